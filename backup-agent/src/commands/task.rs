use crate::app::AgentApp;
use backup_core::{
    error::{BackupError, Result},
    ops::ArchiveCompression,
    schedule::Schedule,
    sync::ActiveTask,
    task::BackupTask,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 显示本地备份任务
pub fn show_task(app: &AgentApp) -> Result<()> {
    let store = app.task_store();
    let Some(task) = app.load_local_task()? else {
        warn!("本地任务文件不存在: {}", store.path().display());
        info!("👉 运行 'backup-agent task refresh' 从中央服务器或本机虚拟机生成任务");
        return Ok(());
    };

    info!("📋 备份任务: {}", store.path().display());
    info!("   并行备份数: {}", task.parallel_backups);
    for vm in &task.virtual_machines {
        info!("🖥️  {}", vm.vm_name);
        info!("   导出路径: {}", vm.export_path_template);
        info!("   导出保留天数: {}", vm.export_rotate_days);
        if vm.create_archive {
            info!("   归档路径: {}", vm.archive_path_template);
            info!("   压缩级别: {}", vm.archive_compression_level);
        }
        info!("   归档保留天数: {}", vm.archive_rotate_days);

        for (index, config) in vm.backup_schedules.iter().enumerate() {
            match Schedule::from_config(config) {
                Ok(schedule) => info!("   计划 #{}: {}", index + 1, schedule),
                Err(e) => warn!("   计划 #{}: 无效 ({})", index + 1, e),
            }
        }
    }
    Ok(())
}

/// 列出任务中的所有问题，每条以虚拟机名称开头
pub fn collect_problems(task: &BackupTask) -> Vec<String> {
    let mut problems = Vec::new();
    if task.is_empty() {
        problems.push("任务中没有虚拟机".to_string());
    }

    for vm in &task.virtual_machines {
        if vm.export_path_template.trim().is_empty() {
            problems.push(format!("{}: 未设置 ExportPathTemplate", vm.vm_name));
        }
        if vm.create_archive {
            if vm.archive_path_template.trim().is_empty() {
                problems.push(format!("{}: 未设置 ArchivePathTemplate", vm.vm_name));
            }
            if let Err(e) = ArchiveCompression::from_level(vm.archive_compression_level) {
                problems.push(format!("{}: {}", vm.vm_name, e));
            }
        }
        for (index, config) in vm.backup_schedules.iter().enumerate() {
            if let Err(e) = Schedule::from_config(config) {
                problems.push(format!("{}: 计划 #{}: {}", vm.vm_name, index + 1, e));
            }
        }
    }
    problems
}

/// 校验任务文件
pub fn validate_task(app: &AgentApp, file: Option<&Path>) -> Result<()> {
    let store = app.task_store();
    let path = file.unwrap_or_else(|| store.path());
    let task = BackupTask::load_from_file(path)?;

    let problems = collect_problems(&task);
    if problems.is_empty() {
        let schedules: usize = task
            .virtual_machines
            .iter()
            .map(|vm| vm.backup_schedules.len())
            .sum();
        info!(
            "✅ 任务有效: {} 台虚拟机, {} 个计划",
            task.virtual_machines.len(),
            schedules
        );
        return Ok(());
    }

    for problem in &problems {
        error!("❌ {}", problem);
    }
    Err(BackupError::validation(format!(
        "{} 中发现 {} 个问题",
        path.display(),
        problems.len()
    )))
}

/// 同步一次备份任务并报告是否变化
pub async fn refresh_task(app: &AgentApp) -> Result<()> {
    let active = Arc::new(ActiveTask::new());
    if let Some(local) = app.load_local_task()? {
        active.replace(Arc::new(local));
    }

    let (sync, _changes) = app.task_sync(active.clone());
    if sync.refresh().await? {
        info!("🔄 备份任务已更新并保存到 {}", sync.store().path().display());
    } else {
        info!("✅ 备份任务没有变化");
        sync.register_host().await;
    }

    if let Some(task) = active.current() {
        info!("   虚拟机: {}", task.machine_names().join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_problems() {
        let json = r#"{"ParallelBackups": 1, "VirtualMachines": [
            {"VmName": "good", "ExportPathTemplate": "/b/{GUEST_FULL}",
             "BackupSchedules": [{"Type": "Daily", "OccursOnceAt": "01:00"}]},
            {"VmName": "bad", "CreateArchive": true, "ArchiveCompressionLevel": 7,
             "ArchivePathTemplate": "/a/x.zip",
             "BackupSchedules": [{"Type": "Daily", "IntervalUnit": "minute", "Interval": 0}]}
        ]}"#;
        let task = BackupTask::from_json(json).unwrap();

        let problems = collect_problems(&task);
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().all(|p| p.starts_with("bad: ")));
    }

    #[test]
    fn test_empty_task_is_a_problem() {
        assert_eq!(collect_problems(&BackupTask::new(1, Vec::new())).len(), 1);
    }
}
