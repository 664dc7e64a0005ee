use backup_core::{config::AppConfig, error::Result};
use std::path::Path;
use tracing::{info, warn};

/// 写入默认配置文件
pub fn run_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        warn!("⚠️  配置文件已存在: {}", config_path.display());
        info!("如果要覆盖，请使用 --force 参数");
        info!("示例: backup-agent init --force");
        return Ok(());
    }

    let config = AppConfig::default();
    config.save_to_file(config_path)?;
    info!("✅ 创建配置文件: {}", config_path.display());
    info!("👉 修改 [central_server] url 以连接中央服务器，修改 [export] 以适配宿主机的导出命令");
    Ok(())
}
