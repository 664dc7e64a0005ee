use anyhow::Context;
use backup_agent::{AgentApp, Cli, Commands, resolve_log_dir, run_init, setup_logging};
use clap::Parser;
use tracing::error;

#[tokio::main]
async fn main() {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录，guard 保留到进程结束
    let _log_guard = setup_logging(cli.verbose, resolve_log_dir(&cli.config).as_deref());

    if let Err(e) = run(cli).await {
        error!("❌ 操作失败: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // `init` 命令不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        return run_init(&cli.config, force).context("初始化配置文件失败");
    }

    let app = AgentApp::load(&cli.config)
        .with_context(|| format!("加载配置文件失败: {}", cli.config.display()))?;

    app.run_command(cli.command).await?;
    Ok(())
}
