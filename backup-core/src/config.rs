use crate::constants::{api, config, intervals, task};
use crate::error::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub central_server: CentralServerConfig,
    #[serde(default)]
    pub host: HostConfig,
    pub export: CommandConfig,
    pub inventory: CommandConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 服务相关配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub task_file: String,
    pub default_parallel_backups: usize,
}

/// 周期任务间隔（秒）
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IntervalsConfig {
    pub progress_report_secs: u64,
    pub task_refresh_secs: u64,
}

/// 中央服务器配置，url 为空表示独立运行
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CentralServerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for CentralServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: api::http::DEFAULT_TIMEOUT,
        }
    }
}

fn default_timeout() -> u64 {
    api::http::DEFAULT_TIMEOUT
}

/// 主机名配置，为空时从环境推断
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub short_name: String,
}

/// 外部命令配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                task_file: task::DEFAULT_TASK_FILE.to_string(),
                default_parallel_backups: task::DEFAULT_PARALLEL_BACKUPS,
            },
            intervals: IntervalsConfig {
                progress_report_secs: intervals::DEFAULT_PROGRESS_REPORT_SECS,
                task_refresh_secs: intervals::DEFAULT_TASK_REFRESH_SECS,
            },
            central_server: CentralServerConfig::default(),
            host: HostConfig::default(),
            export: CommandConfig {
                program: config::DEFAULT_EXPORT_PROGRAM.to_string(),
                args: config::DEFAULT_EXPORT_ARGS.iter().map(|s| s.to_string()).collect(),
            },
            inventory: CommandConfig {
                program: config::DEFAULT_INVENTORY_PROGRAM.to_string(),
                args: config::DEFAULT_INVENTORY_ARGS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载配置文件，不存在时写入默认配置并使用它
    pub fn find_and_load_config(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(config::get_config_file_path, Path::to_path_buf);

        if path.exists() {
            tracing::info!("找到配置文件: {}", path.display());
            return Self::load_from_file(&path);
        }

        tracing::warn!("未找到配置文件，创建默认配置: {}", path.display());
        let default_config = Self::default();
        default_config.save_to_file(&path)?;
        Ok(default_config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Err(BackupError::ConfigNotFound);
        }
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = self.to_toml_with_comments()?;
        fs::write(&path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.intervals.progress_report_secs == 0 {
            return Err(BackupError::validation(
                "intervals.progress_report_secs must be greater than 0",
            ));
        }
        if self.intervals.task_refresh_secs == 0 {
            return Err(BackupError::validation(
                "intervals.task_refresh_secs must be greater than 0",
            ));
        }
        if self.central_server.timeout_secs == 0 {
            return Err(BackupError::validation(
                "central_server.timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> Result<String> {
        const TEMPLATE: &str = include_str!("../templates/config.toml.template");

        Ok(TEMPLATE
            .replace("{task_file}", &quote(&self.service.task_file))
            .replace(
                "{default_parallel_backups}",
                &self.service.default_parallel_backups.to_string(),
            )
            .replace(
                "{progress_report_secs}",
                &self.intervals.progress_report_secs.to_string(),
            )
            .replace(
                "{task_refresh_secs}",
                &self.intervals.task_refresh_secs.to_string(),
            )
            .replace("{central_server_url}", &quote(&self.central_server.url))
            .replace(
                "{central_server_timeout}",
                &self.central_server.timeout_secs.to_string(),
            )
            .replace("{host_full_name}", &quote(&self.host.full_name))
            .replace("{host_short_name}", &quote(&self.host.short_name))
            .replace("{export_program}", &quote(&self.export.program))
            .replace("{export_args}", &quote_list(&self.export.args)?)
            .replace("{inventory_program}", &quote(&self.inventory.program))
            .replace("{inventory_args}", &quote_list(&self.inventory.args)?)
            .replace("{log_dir}", &quote(&self.logging.dir)))
    }

    pub fn task_file(&self) -> PathBuf {
        PathBuf::from(&self.service.task_file)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.progress_report_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.intervals.task_refresh_secs)
    }

    /// 中央服务器地址，未配置时为 None
    pub fn central_server_url(&self) -> Option<&str> {
        let url = self.central_server.url.trim();
        (!url.is_empty()).then_some(url)
    }

    /// 日志目录：环境变量优先，其次配置文件
    pub fn log_dir(&self) -> Option<PathBuf> {
        std::env::var(config::LOG_DIR_ENV)
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .or_else(|| Some(self.logging.dir.clone()).filter(|dir| !dir.trim().is_empty()))
            .map(PathBuf::from)
    }
}

fn quote(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

fn quote_list(values: &[String]) -> Result<String> {
    #[derive(Serialize)]
    struct Wrapper<'a> {
        v: &'a [String],
    }
    let line = toml::to_string(&Wrapper { v: values })?;
    Ok(line
        .trim()
        .strip_prefix("v = ")
        .unwrap_or("[]")
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_round_trips_through_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.central_server.url = "http://central:5000".to_string();
        config.export.args = vec![
            "-Command".to_string(),
            "Export-VM -Name '{GUEST_FULL}' -Path \"{EXPORT_PATH}\"".to_string(),
        ];
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.central_server_url(), Some("http://central:5000"));
    }

    #[test]
    fn test_missing_config_is_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = AppConfig::find_and_load_config(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.central_server_url(), None);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.intervals.task_refresh_secs = 0;
        config.save_to_file(&path).unwrap();

        let err = AppConfig::load_from_file(&path).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            AppConfig::load_from_file(dir.path().join("none.toml")),
            Err(BackupError::ConfigNotFound)
        ));
    }
}
