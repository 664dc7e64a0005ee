use crate::app::AgentApp;
use backup_core::{
    error::Result,
    schedule::{Schedule, scheduler::local_now},
};
use tracing::{info, warn};

/// 预览本地任务中每个计划接下来的触发时间
pub fn preview_schedules(app: &AgentApp, count: usize) -> Result<()> {
    let Some(task) = app.load_local_task()? else {
        warn!("本地任务文件不存在: {}", app.task_store().path().display());
        return Ok(());
    };

    let now = local_now();
    info!("🕒 当前时间: {}", now);
    for vm in &task.virtual_machines {
        info!("🖥️  {}", vm.vm_name);
        for (index, config) in vm.backup_schedules.iter().enumerate() {
            let schedule = match Schedule::from_config(config) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!("   计划 #{}: 无效 ({})", index + 1, e);
                    continue;
                }
            };

            info!("   计划 #{}: {}", index + 1, schedule);
            let upcoming = schedule.upcoming(now, count);
            if upcoming.is_empty() {
                info!("      (不会触发)");
            }
            for at in upcoming {
                info!("      {}", at.format("%Y-%m-%d %H:%M:%S %a"));
            }
        }
    }
    Ok(())
}
