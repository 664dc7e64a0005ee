use crate::project_info::{metadata, version_info};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 备份任务相关命令
#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// 显示本地备份任务
    Show,
    /// 校验任务文件中的每个计划
    Validate {
        /// 任务文件路径（默认使用配置中的任务文件）
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// 立即同步一次备份任务
    Refresh,
}

/// 计划相关命令
#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// 预览每个计划接下来的触发时间
    Preview {
        /// 每个计划显示的次数
        #[arg(long, default_value = "5")]
        count: usize,
    },
}

/// 虚拟机定时备份代理
#[derive(Parser)]
#[command(name = "backup-agent")]
#[command(about = metadata::PROJECT_DESCRIPTION)]
#[command(version = version_info::AGENT_VERSION)]
#[command(long_about = metadata::DESCRIPTION_LONG)]
#[command(author = metadata::PROJECT_AUTHORS)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动备份服务：任务同步、计划调度、进度上报
    Run,
    /// 创建默认配置文件
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 备份任务管理
    #[command(subcommand)]
    Task(TaskCommand),
    /// 计划预览
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// 立即备份指定虚拟机
    Backup {
        /// 虚拟机名称
        machine: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::parse_from(["backup-agent", "-c", "/etc/agent.toml", "task", "validate", "--file", "t.json"]);
        assert_eq!(cli.config, PathBuf::from("/etc/agent.toml"));
        match cli.command {
            Commands::Task(TaskCommand::Validate { file }) => {
                assert_eq!(file, Some(PathBuf::from("t.json")));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::parse_from(["backup-agent", "-v", "schedule", "preview"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Schedule(ScheduleCommand::Preview { count: 5 })
        ));

        let cli = Cli::parse_from(["backup-agent", "backup", "web01"]);
        assert!(matches!(cli.command, Commands::Backup { machine } if machine == "web01"));
    }
}
