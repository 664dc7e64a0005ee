use crate::app::AgentApp;
use backup_core::error::{BackupError, Result};
use tracing::info;

/// 立即对指定虚拟机执行一次备份
pub async fn backup_machine(app: &AgentApp, machine: &str) -> Result<()> {
    let task = app.load_local_task()?.ok_or_else(|| {
        BackupError::validation(format!(
            "本地任务文件不存在: {}",
            app.task_store().path().display()
        ))
    })?;
    let vm = task.require_machine(machine)?;

    let (orchestrator, _fires) = app.orchestrator();
    info!("🚀 开始备份虚拟机: {}", vm.vm_name);
    orchestrator.run_pipeline(&vm).await?;

    info!("✅ 备份完成: {}", vm.vm_name);
    if let Some(path) = vm.runtime.export_path() {
        info!("   导出目录: {}", path.display());
    }
    if let Some(path) = vm.runtime.archive_path() {
        info!("   归档文件: {}", path.display());
    }
    Ok(())
}
