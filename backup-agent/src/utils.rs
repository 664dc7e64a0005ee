use backup_core::config::AppConfig;
use backup_core::constants::config::{LOG_DIR_ENV, LOG_FILE_PREFIX};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

/// # 日志系统
///
/// 库代码只使用 `tracing` 宏，日志输出由入口统一配置。
///
/// - `-v, --verbose`：默认级别改为 DEBUG
/// - `RUST_LOG`：覆盖默认级别，例如 `RUST_LOG=backup_core::orchestrator=debug`
/// - `BACKUP_LOG_DIR` 或配置文件 `[logging] dir`：日志写入该目录下按天滚动的文件
///
/// 写入文件时返回的 guard 必须保留到进程结束，否则缓冲中的日志会丢失。
pub fn setup_logging(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_dir {
        Some(dir) => {
            // 文件输出使用详细格式便于排查
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true)
                .init();
            Some(guard)
        }
        None => {
            // 终端输出使用简洁格式
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .compact()
                .init();
            None
        }
    }
}

/// 在日志初始化之前确定日志目录：环境变量优先，其次配置文件
pub fn resolve_log_dir(config_path: &Path) -> Option<PathBuf> {
    if let Some(dir) = std::env::var(LOG_DIR_ENV)
        .ok()
        .filter(|dir| !dir.trim().is_empty())
    {
        return Some(PathBuf::from(dir));
    }

    AppConfig::load_from_file(config_path)
        .ok()
        .and_then(|config| config.log_dir())
}
