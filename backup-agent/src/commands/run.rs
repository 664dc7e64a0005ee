use crate::app::AgentApp;
use crate::project_info::get_version_string;
use backup_core::{error::Result, sync::ActiveTask};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 启动备份服务，直到收到 Ctrl+C
///
/// 停止时先停止接收新的触发和各个定时器，再等待正在执行的备份批次完成。
pub async fn run_service(app: &AgentApp) -> Result<()> {
    info!("🚀 {} 启动", get_version_string());
    info!("   主机: {} ({})", app.host.full, app.host.short);
    info!("   任务文件: {}", app.task_store().path().display());

    let cancel = CancellationToken::new();
    let active = Arc::new(ActiveTask::new());

    let (sync, changes) = app.task_sync(active.clone());
    let sync = Arc::new(sync);
    let (orchestrator, fires) = app.orchestrator();
    let reporter = Arc::new(app.reporter(active));

    let orchestrator_handle = orchestrator.spawn(fires, changes, cancel.clone());
    let sync_handle = tokio::spawn(sync.run(app.config.refresh_interval(), cancel.clone()));
    let reporter_handle =
        tokio::spawn(reporter.run(app.config.progress_interval(), cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("⏹️  收到停止信号，等待正在执行的备份完成...");

    cancel.cancel();
    orchestrator.stop();
    orchestrator.wait_idle().await;

    for handle in [orchestrator_handle, sync_handle, reporter_handle] {
        if let Err(e) = handle.await {
            warn!(error = %e, "后台任务异常退出");
        }
    }

    info!("✅ 备份服务已停止");
    Ok(())
}
