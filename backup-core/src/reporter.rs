use crate::api::ApiResult;
use crate::error::Result;
use crate::sync::ActiveTask;
use crate::task::{BackupState, MachineStatus};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 进度的接收方
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn reachable(&self) -> bool;

    async fn push(&self, hypervisor: &str, states: Vec<BackupState>) -> Result<ApiResult>;
}

/// 进度上报器
///
/// 按固定周期采样当前任务中每台虚拟机的状态：
/// 处于导出或归档阶段时输出进度，中央服务器可达时推送状态快照。
/// 最近一次成功备份的时间由流水线记录，上报器只读取。
pub struct ProgressReporter {
    hypervisor: String,
    active: Arc<ActiveTask>,
    sink: Option<Arc<dyn ProgressSink>>,
    in_progress: Mutex<HashSet<String>>,
}

impl ProgressReporter {
    pub fn new(hypervisor: impl Into<String>, active: Arc<ActiveTask>) -> Self {
        Self {
            hypervisor: hypervisor.into(),
            active,
            sink: None,
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 采样一次并返回状态快照
    ///
    /// 快照中为 `Completed` 的虚拟机随后置回 `Idle`，每次成功只报告一次。
    pub fn sample(&self) -> Vec<BackupState> {
        let Some(task) = self.active.current() else {
            return Vec::new();
        };

        let mut in_progress = self.in_progress.lock().unwrap_or_else(|e| e.into_inner());
        for vm in &task.virtual_machines {
            let status = vm.runtime.status();
            match status {
                MachineStatus::Exporting => {
                    debug!(machine = %vm.name(), percent = vm.runtime.export_percent(), "导出进度");
                    in_progress.insert(vm.vm_name.clone());
                }
                MachineStatus::Archiving => {
                    debug!(machine = %vm.name(), percent = vm.runtime.archive_percent(), "归档进度");
                    in_progress.insert(vm.vm_name.clone());
                }
                _ => {
                    if in_progress.remove(&vm.vm_name) {
                        debug!(machine = %vm.name(), status = ?status, "备份阶段结束");
                    }
                }
            }
        }

        let states = task.snapshot();
        for (vm, state) in task.virtual_machines.iter().zip(&states) {
            if state.status == MachineStatus::Completed && vm.runtime.settle_completed() {
                debug!(machine = %vm.name(), "已报告备份完成");
            }
        }
        states
    }

    /// 采样并推送；返回是否推送成功
    pub async fn report_once(&self) -> bool {
        let states = self.sample();
        if states.is_empty() {
            return false;
        }

        let Some(sink) = &self.sink else {
            return false;
        };

        if !sink.reachable().await {
            debug!("中央服务器不可达，跳过进度上报");
            return false;
        }

        match sink.push(&self.hypervisor, states).await {
            Ok(result) if result.success => true,
            Ok(result) => {
                warn!(
                    reason = result.message.as_deref().unwrap_or_default(),
                    "中央服务器拒绝了进度上报"
                );
                false
            }
            Err(e) => {
                error!(error = %e, "上报备份进度失败");
                false
            }
        }
    }

    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("进度上报已停止");
                    break;
                }
                _ = ticker.tick() => {
                    self.report_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BackupTask, VirtualMachine};

    #[derive(Default)]
    struct RecordingSink {
        pushed: Mutex<Vec<(String, Vec<BackupState>)>>,
    }

    #[async_trait::async_trait]
    impl ProgressSink for RecordingSink {
        async fn reachable(&self) -> bool {
            true
        }

        async fn push(&self, hypervisor: &str, states: Vec<BackupState>) -> Result<ApiResult> {
            self.pushed
                .lock()
                .unwrap()
                .push((hypervisor.to_string(), states));
            Ok(ApiResult {
                success: true,
                ..ApiResult::default()
            })
        }
    }

    fn active_with(names: &[&str]) -> Arc<ActiveTask> {
        let active = Arc::new(ActiveTask::new());
        let machines = names.iter().map(|n| VirtualMachine::new(*n)).collect();
        active.replace(Arc::new(BackupTask::new(1, machines)));
        active
    }

    #[tokio::test]
    async fn test_sample_does_not_stamp_last_backup() {
        let active = active_with(&["vm1"]);
        let reporter = ProgressReporter::new("hv01", active.clone());
        let task = active.current().unwrap();
        let vm = &task.virtual_machines[0];

        vm.runtime.set_status(MachineStatus::Exporting);
        vm.runtime.set_export_percent(40);
        let states = reporter.sample();
        assert_eq!(states[0].percent, 40);

        // 导出失败后直接回到 Idle
        vm.runtime.set_status(MachineStatus::Idle);
        reporter.sample();
        assert!(vm.runtime.last_backup().is_none());
        assert_eq!(vm.runtime.status(), MachineStatus::Idle);
    }

    #[tokio::test]
    async fn test_completed_reported_once() {
        let active = active_with(&["vm1"]);
        let reporter = ProgressReporter::new("hv01", active.clone());
        let task = active.current().unwrap();
        let vm = &task.virtual_machines[0];

        vm.runtime.set_status(MachineStatus::Completed);
        let states = reporter.sample();
        assert_eq!(states[0].status, MachineStatus::Completed);
        assert_eq!(states[0].percent, 100);
        assert_eq!(vm.runtime.status(), MachineStatus::Idle);

        let states = reporter.sample();
        assert_eq!(states[0].status, MachineStatus::Idle);
    }

    #[tokio::test]
    async fn test_report_pushes_snapshot() {
        let sink = Arc::new(RecordingSink::default());
        let reporter =
            ProgressReporter::new("hv01", active_with(&["vm1", "vm2"])).with_sink(sink.clone());

        assert!(reporter.report_once().await);
        let pushed = sink.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "hv01");
        assert_eq!(pushed[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_no_task_no_push() {
        let sink = Arc::new(RecordingSink::default());
        let reporter =
            ProgressReporter::new("hv01", Arc::new(ActiveTask::new())).with_sink(sink.clone());
        assert!(!reporter.report_once().await);
        assert!(sink.pushed.lock().unwrap().is_empty());
    }
}
