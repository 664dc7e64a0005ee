//! 备份编排
//!
//! 接收调度器的触发批次，把计划映射回所属虚拟机并排队；
//! 队列按批取出，在不超过 `ParallelBackups` 的并行度下执行 导出 -> 归档 -> 轮转 流水线。
//! 单台虚拟机的失败只影响它自己，批次结束后汇总记录。

use crate::error::{BackupError, MachineFailure, Result};
use crate::ops::{Archiver, Exporter, Remover};
use crate::schedule::{FireBatch, Schedule, ScheduleId, Scheduler};
use crate::task::{BackupTask, MachineStatus, TaskStatus, VirtualMachine};
use crate::template::{HostNames, resolve_path};
use chrono::{Local, NaiveDateTime};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// 流水线用到的外部操作
#[derive(Clone)]
pub struct Collaborators {
    pub exporter: Arc<dyn Exporter>,
    pub archiver: Arc<dyn Archiver>,
    pub remover: Arc<dyn Remover>,
}

/// 已加载到调度器中的任务
struct LoadedTask {
    task: Arc<BackupTask>,
    owners: HashMap<ScheduleId, (Arc<VirtualMachine>, Arc<Schedule>)>,
}

pub struct Orchestrator {
    host: HostNames,
    default_parallel: usize,
    ops: Collaborators,
    scheduler: Arc<Scheduler>,
    loaded: RwLock<Option<LoadedTask>>,
    pending: Mutex<VecDeque<Arc<VirtualMachine>>>,
    running: AtomicBool,
    accepting: AtomicBool,
    idle: Notify,
}

impl Orchestrator {
    pub fn new(
        host: HostNames,
        default_parallel: usize,
        ops: Collaborators,
        scheduler: Arc<Scheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            host,
            default_parallel: default_parallel.max(1),
            ops,
            scheduler,
            loaded: RwLock::new(None),
            pending: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            idle: Notify::new(),
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn current_task(&self) -> Option<Arc<BackupTask>> {
        self.loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|loaded| Arc::clone(&loaded.task))
    }

    /// 已加载的计划及其所属虚拟机名称
    pub fn schedules(&self) -> Vec<(String, Arc<Schedule>)> {
        let loaded = self.loaded.read().unwrap_or_else(|e| e.into_inner());
        let Some(loaded) = loaded.as_ref() else {
            return Vec::new();
        };

        let mut schedules: Vec<(String, Arc<Schedule>)> = loaded
            .owners
            .values()
            .map(|(vm, schedule)| (vm.vm_name.clone(), Arc::clone(schedule)))
            .collect();
        schedules.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.created_at().cmp(&b.1.created_at())));
        schedules
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 加载新任务：丢弃旧计划，为每台虚拟机重新构造计划并加入调度器
    ///
    /// 无效的计划只跳过它自己。没有虚拟机的任务被拒绝，旧计划保持不变。
    /// 返回加载的计划数量。
    pub fn load_task(&self, task: Arc<BackupTask>) -> Result<usize> {
        if task.is_empty() {
            return Err(BackupError::validation("backup task has no virtual machines"));
        }

        let mut owners = HashMap::new();
        for vm in &task.virtual_machines {
            for (index, config) in vm.backup_schedules.iter().enumerate() {
                match Schedule::from_config(config) {
                    Ok(schedule) => {
                        owners.insert(schedule.id(), (Arc::clone(vm), Arc::new(schedule)));
                    }
                    Err(e) => warn!(
                        machine = %vm.name(),
                        schedule = index,
                        error = %e,
                        "计划无效，已跳过"
                    ),
                }
            }
        }

        let mut loaded = self.loaded.write().unwrap_or_else(|e| e.into_inner());
        self.scheduler.clear();
        for (_, schedule) in owners.values() {
            self.scheduler.add_schedule(Arc::clone(schedule));
        }

        if let Some(previous) = loaded.as_ref() {
            previous.task.set_status(TaskStatus::Idle);
        }
        if self.is_running() {
            task.set_status(TaskStatus::Active);
        }

        let count = owners.len();
        info!(
            machines = task.virtual_machines.len(),
            schedules = count,
            armed = self.scheduler.len(),
            "备份计划已重新加载"
        );
        *loaded = Some(LoadedTask { task, owners });
        Ok(count)
    }

    /// 处理一个触发批次：映射到虚拟机并排队，当前没有在执行时开始执行
    pub fn on_fire(self: &Arc<Self>, batch: FireBatch) {
        if !self.accepting.load(Ordering::Acquire) {
            debug!(schedules = batch.schedules.len(), "已停止接收触发，忽略");
            return;
        }

        let mut machines = Vec::with_capacity(batch.schedules.len());
        {
            let loaded = self.loaded.read().unwrap_or_else(|e| e.into_inner());
            for id in &batch.schedules {
                match loaded.as_ref().and_then(|l| l.owners.get(id)) {
                    Some((vm, _)) => machines.push(Arc::clone(vm)),
                    None => {
                        let e = BackupError::lookup(id.to_string());
                        error!(error = %e, "丢弃本次触发");
                    }
                }
            }
        }

        if machines.is_empty() {
            return;
        }

        for vm in &machines {
            info!(machine = %vm.name(), at = %batch.at, "计划触发，加入备份队列");
        }
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(machines);

        self.start_drain();
    }

    /// 没有在执行时启动一次队列处理
    fn start_drain(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drain().await });
        }
    }

    fn take_pending(&self) -> Vec<Arc<VirtualMachine>> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    /// 反复取出队列中的全部条目按批执行，直到队列为空
    ///
    /// 每批开始前重新读取当前任务，执行期间重新加载的任务同样显示为 Active。
    async fn drain(self: Arc<Self>) {
        loop {
            let batch = self.take_pending();
            if batch.is_empty() {
                if let Some(task) = self.current_task() {
                    task.set_status(TaskStatus::Idle);
                    task.stamp_executed(Local::now());
                }
                self.running.store(false, Ordering::Release);
                // 清除标志前可能又有条目入队
                if self.pending_len() > 0
                    && self
                        .running
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    continue;
                }
                break;
            }

            if let Some(task) = self.current_task() {
                task.set_status(TaskStatus::Active);
            }
            let failures = self.run_batch(batch).await;
            if !failures.is_empty() {
                let e = BackupError::Aggregate(failures);
                error!(error = %e, "备份批次完成，部分虚拟机失败");
            }
        }

        self.idle.notify_waiters();
    }

    fn parallelism(&self) -> usize {
        match self.current_task() {
            Some(task) if task.parallel_backups > 0 => task.parallel_backups,
            _ => self.default_parallel,
        }
    }

    /// 以有限并行度执行一批虚拟机，返回各自的失败
    ///
    /// 同一台虚拟机在批次中出现多次时，在同一个工作者上依次执行。
    pub async fn run_batch(self: &Arc<Self>, machines: Vec<Arc<VirtualMachine>>) -> Vec<MachineFailure> {
        let mut groups: Vec<(Arc<VirtualMachine>, usize)> = Vec::new();
        for vm in machines {
            match groups.iter_mut().find(|(queued, _)| Arc::ptr_eq(queued, &vm)) {
                Some((_, runs)) => *runs += 1,
                None => groups.push((vm, 1)),
            }
        }

        let parallel = self.parallelism();
        debug!(machines = groups.len(), parallel, "开始执行备份批次");

        let results: Vec<Vec<MachineFailure>> = stream::iter(groups.into_iter().map(|(vm, runs)| {
            let this = Arc::clone(self);
            async move {
                let name = vm.vm_name.clone();
                let handle = tokio::spawn(async move {
                    let mut failures = Vec::new();
                    for _ in 0..runs {
                        if let Err(e) = this.run_pipeline(&vm).await {
                            error!(machine = %vm.name(), error = %e, "虚拟机备份失败");
                            failures.push(MachineFailure {
                                machine: vm.vm_name.clone(),
                                message: e.to_string(),
                            });
                        }
                    }
                    failures
                });

                match handle.await {
                    Ok(failures) => failures,
                    Err(e) => {
                        error!(machine = %name, error = %e, "备份工作者异常退出");
                        vec![MachineFailure {
                            machine: name,
                            message: BackupError::from(e).to_string(),
                        }]
                    }
                }
            }
        }))
        .buffer_unordered(parallel)
        .collect()
        .await;

        results.into_iter().flatten().collect()
    }

    /// 对单台虚拟机执行 导出 -> 归档 -> 轮转
    ///
    /// 导出失败时直接结束；归档失败时仍然执行轮转，最后返回归档错误。
    /// 只有成功结束时才记录最近一次备份时间，状态为 `Completed`。
    #[instrument(skip_all, fields(machine = %vm.vm_name))]
    pub async fn run_pipeline(&self, vm: &Arc<VirtualMachine>) -> Result<()> {
        let name = vm.name();
        let started = Local::now();
        let clock = started.naive_local();

        vm.runtime.set_status(MachineStatus::Exporting);
        vm.runtime.begin_run(started);
        vm.runtime.set_archive_path(None);

        let export_path = match self.resolve(name, &vm.export_path_template, clock) {
            Ok(path) => path,
            Err(e) => {
                self.finish(vm);
                return Err(e);
            }
        };
        vm.runtime.set_export_path(Some(export_path.clone()));

        info!(path = %export_path.display(), "开始导出虚拟机");
        if let Err(e) = self.ops.exporter.export(vm, &export_path).await {
            self.finish(vm);
            return Err(contain(name, e));
        }
        info!(path = %export_path.display(), "虚拟机导出完成");

        let archive_path = if vm.archive_path_template.trim().is_empty() {
            None
        } else {
            Some(resolve_path(&vm.archive_path_template, &self.host, name, clock))
        };

        let mut archive_error = None;
        if vm.create_archive {
            vm.runtime.set_status(MachineStatus::Archiving);
            match &archive_path {
                Some(path) => {
                    vm.runtime.set_archive_path(Some(path.clone()));
                    info!(path = %path.display(), "开始归档");
                    match self.ops.archiver.archive(vm, &export_path, path).await {
                        Ok(()) => info!(path = %path.display(), "归档完成"),
                        Err(e) => {
                            error!(error = %e, "归档失败");
                            archive_error = Some(contain(name, e));
                        }
                    }
                }
                None => {
                    archive_error = Some(BackupError::validation(format!(
                        "machine '{name}' has CreateArchive set but no ArchivePathTemplate"
                    )));
                }
            }
        }

        if vm.needs_rotation() {
            vm.runtime.set_status(MachineStatus::Rotating);
            info!(
                export_days = vm.export_rotate_days,
                archive_days = vm.archive_rotate_days,
                "开始删除过期备份"
            );
            let summary = self
                .ops
                .remover
                .remove_old_backups(vm, &export_path, archive_path.as_deref())
                .await;
            info!(
                removed_dirs = summary.removed_export_dirs,
                removed_files = summary.removed_archive_files,
                "过期备份删除完成"
            );
        }

        match archive_error {
            Some(e) => {
                self.finish(vm);
                Err(e)
            }
            None => {
                let ended = Local::now();
                vm.runtime.stamp_end(ended);
                vm.runtime.stamp_last_backup(ended);
                vm.runtime.set_status(MachineStatus::Completed);
                Ok(())
            }
        }
    }

    fn resolve(&self, name: &str, template: &str, clock: NaiveDateTime) -> Result<PathBuf> {
        if template.trim().is_empty() {
            return Err(BackupError::validation(format!(
                "machine '{name}' has no export path template"
            )));
        }
        Ok(resolve_path(template, &self.host, name, clock))
    }

    /// 失败后回到 Idle 并记录结束时间；最近一次成功备份时间保持不变
    fn finish(&self, vm: &VirtualMachine) {
        vm.runtime.set_status(MachineStatus::Idle);
        vm.runtime.stamp_end(Local::now());
    }

    /// 停止接收新的触发并停止调度器；正在执行的批次继续完成
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        self.scheduler.stop();
        info!("编排器已停止接收新的触发");
    }

    /// 等待当前没有批次在执行
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// 启动事件循环：处理触发批次和任务变更，直到取消
    pub fn spawn(
        self: &Arc<Self>,
        mut fires: mpsc::UnboundedReceiver<FireBatch>,
        mut changes: mpsc::UnboundedReceiver<Arc<BackupTask>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        this.scheduler.start();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        this.stop();
                        break;
                    }
                    Some(batch) = fires.recv() => {
                        this.on_fire(batch);
                    }
                    Some(task) = changes.recv() => {
                        if let Err(e) = this.load_task(task) {
                            error!(error = %e, "新任务无法加载，保留原有计划");
                        }
                    }
                    else => break,
                }
            }
        })
    }
}

/// 外部操作的错误统一归为该虚拟机的 ExternalOperation，校验错误保持原样
fn contain(machine: &str, e: BackupError) -> BackupError {
    match e {
        BackupError::ExternalOperation { .. } | BackupError::Validation(_) => e,
        other => BackupError::external(machine, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::RemovalSummary;
    use crate::schedule::scheduler::local_now;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeExporter {
        fail_for: Option<String>,
        delay_ms: u64,
        calls: Mutex<Vec<String>>,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Exporter for FakeExporter {
        async fn export(&self, machine: &Arc<VirtualMachine>, _export_path: &Path) -> Result<()> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(machine.vm_name.clone());
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.current.fetch_sub(1, Ordering::SeqCst);

            if self.fail_for.as_deref() == Some(machine.name()) {
                return Err(BackupError::external(machine.name(), "export job failed"));
            }
            machine.runtime.set_export_percent(100);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeArchiver {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Archiver for FakeArchiver {
        async fn archive(
            &self,
            machine: &Arc<VirtualMachine>,
            _export_path: &Path,
            _archive_path: &Path,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(machine.vm_name.clone());
            if self.fail {
                return Err(BackupError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRemover {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Remover for FakeRemover {
        async fn remove_old_backups(
            &self,
            machine: &Arc<VirtualMachine>,
            _export_path: &Path,
            _archive_path: Option<&Path>,
        ) -> RemovalSummary {
            self.calls.lock().unwrap().push(machine.vm_name.clone());
            RemovalSummary::default()
        }
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        exporter: Arc<FakeExporter>,
        archiver: Arc<FakeArchiver>,
        remover: Arc<FakeRemover>,
    }

    fn harness(exporter: FakeExporter, archiver: FakeArchiver) -> Harness {
        let exporter = Arc::new(exporter);
        let archiver = Arc::new(archiver);
        let remover = Arc::new(FakeRemover::default());
        let (scheduler, _fires) = Scheduler::new();
        let orchestrator = Orchestrator::new(
            HostNames {
                full: "hv01.local".to_string(),
                short: "hv01".to_string(),
            },
            1,
            Collaborators {
                exporter: exporter.clone(),
                archiver: archiver.clone(),
                remover: remover.clone(),
            },
            scheduler,
        );
        Harness {
            orchestrator,
            exporter,
            archiver,
            remover,
        }
    }

    fn task(parallel: usize, names: &[&str]) -> Arc<BackupTask> {
        let vms: Vec<String> = names
            .iter()
            .map(|name| {
                format!(
                    r#"{{"VmName": "{name}",
                        "ExportPathTemplate": "/backup/{{GUEST_FULL}}/{{YEAR}}{{MONTH}}{{DAY}}",
                        "ExportRotateDays": 2,
                        "CreateArchive": true,
                        "ArchivePathTemplate": "/archive/{{GUEST_SHORT}}.zip",
                        "ArchiveRotateDays": 5,
                        "BackupSchedules": [
                            {{"Type": "Daily", "OccursOnceAt": "01:00"}},
                            {{"Type": "Daily", "IntervalUnit": "hour", "Interval": 6}}
                        ]}}"#
                )
            })
            .collect();
        let json = format!(
            r#"{{"ParallelBackups": {parallel}, "VirtualMachines": [{}]}}"#,
            vms.join(",")
        );
        Arc::new(BackupTask::from_json(&json).unwrap())
    }

    /// 每台虚拟机取第一个计划组成一个触发批次
    fn fire_all(orchestrator: &Orchestrator, names: &[&str]) -> FireBatch {
        let schedules = orchestrator.schedules();
        let ids = names
            .iter()
            .map(|name| {
                schedules
                    .iter()
                    .find(|(owner, _)| owner == name)
                    .map(|(_, s)| s.id())
                    .unwrap()
            })
            .collect();
        FireBatch {
            at: local_now(),
            schedules: ids,
        }
    }

    #[tokio::test]
    async fn test_export_failure_is_isolated() {
        let h = harness(
            FakeExporter {
                fail_for: Some("vm2".to_string()),
                ..FakeExporter::default()
            },
            FakeArchiver::default(),
        );
        let task = task(3, &["vm1", "vm2", "vm3"]);
        h.orchestrator.load_task(task.clone()).unwrap();

        let failures = h.orchestrator.run_batch(task.virtual_machines.clone()).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].machine, "vm2");

        let mut archived = h.archiver.calls.lock().unwrap().clone();
        archived.sort();
        assert_eq!(archived, vec!["vm1", "vm3"]);
        let mut rotated = h.remover.calls.lock().unwrap().clone();
        rotated.sort();
        assert_eq!(rotated, vec!["vm1", "vm3"]);

        for vm in &task.virtual_machines {
            assert!(vm.runtime.backup_end().is_some());
            if vm.vm_name == "vm2" {
                assert_eq!(vm.runtime.status(), MachineStatus::Idle);
                assert!(vm.runtime.last_backup().is_none());
            } else {
                assert_eq!(vm.runtime.status(), MachineStatus::Completed);
                assert!(vm.runtime.last_backup().is_some());
            }
        }
    }

    #[tokio::test]
    async fn test_failed_export_keeps_last_backup_empty() {
        let h = harness(
            FakeExporter {
                fail_for: Some("vm1".to_string()),
                ..FakeExporter::default()
            },
            FakeArchiver::default(),
        );
        let task = task(1, &["vm1"]);
        h.orchestrator.load_task(task.clone()).unwrap();

        let vm = &task.virtual_machines[0];
        let err = h.orchestrator.run_pipeline(vm).await.unwrap_err();
        assert!(matches!(err, BackupError::ExternalOperation { .. }));
        assert_eq!(vm.runtime.status(), MachineStatus::Idle);
        assert!(vm.runtime.backup_end().is_some());
        assert!(vm.runtime.last_backup().is_none());
        assert!(h.archiver.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_during_drain_hands_over_status() {
        let h = harness(
            FakeExporter {
                delay_ms: 30,
                ..FakeExporter::default()
            },
            FakeArchiver::default(),
        );
        let old = task(1, &["vm1"]);
        h.orchestrator.load_task(old.clone()).unwrap();
        let batch = fire_all(&h.orchestrator, &["vm1"]);
        h.orchestrator.on_fire(batch);
        assert!(h.orchestrator.is_running());

        let new = task(1, &["vm1"]);
        h.orchestrator.load_task(new.clone()).unwrap();
        assert_eq!(old.status(), TaskStatus::Idle);
        assert_eq!(new.status(), TaskStatus::Active);

        h.orchestrator.wait_idle().await;
        assert_eq!(new.status(), TaskStatus::Idle);
        assert!(new.last_executed().is_some());
        assert_eq!(old.status(), TaskStatus::Idle);
        assert!(old.last_executed().is_none());
    }

    #[tokio::test]
    async fn test_fire_batch_runs_and_goes_idle() {
        let h = harness(FakeExporter::default(), FakeArchiver::default());
        let task = task(2, &["vm1", "vm2"]);
        assert_eq!(h.orchestrator.load_task(task.clone()).unwrap(), 4);

        let batch = fire_all(&h.orchestrator, &["vm1", "vm2"]);
        h.orchestrator.on_fire(batch);
        h.orchestrator.wait_idle().await;

        assert_eq!(h.exporter.calls.lock().unwrap().len(), 2);
        assert_eq!(h.orchestrator.pending_len(), 0);
        assert_eq!(task.status(), TaskStatus::Idle);
        assert!(task.last_executed().is_some());

        let vm = task.machine("vm1").unwrap();
        assert_eq!(vm.runtime.status(), MachineStatus::Completed);
        assert!(vm.runtime.last_backup().is_some());
        let export = vm.runtime.export_path().unwrap();
        assert!(export.starts_with("/backup/vm1"));
        assert_eq!(vm.runtime.archive_path(), Some(PathBuf::from("/archive/vm1.zip")));
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let h = harness(
            FakeExporter {
                delay_ms: 30,
                ..FakeExporter::default()
            },
            FakeArchiver::default(),
        );
        let task = task(2, &["a", "b", "c", "d", "e"]);
        h.orchestrator.load_task(task.clone()).unwrap();

        let failures = h.orchestrator.run_batch(task.virtual_machines.clone()).await;
        assert!(failures.is_empty());
        assert_eq!(h.exporter.calls.lock().unwrap().len(), 5);
        assert!(h.exporter.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_duplicate_fires_run_sequentially() {
        let h = harness(
            FakeExporter {
                delay_ms: 20,
                ..FakeExporter::default()
            },
            FakeArchiver::default(),
        );
        let task = task(4, &["vm1"]);
        h.orchestrator.load_task(task.clone()).unwrap();

        let vm = task.virtual_machines[0].clone();
        let failures = h.orchestrator.run_batch(vec![vm.clone(), vm]).await;
        assert!(failures.is_empty());
        assert_eq!(h.exporter.calls.lock().unwrap().len(), 2);
        assert_eq!(h.exporter.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_archive_failure_still_rotates() {
        let h = harness(
            FakeExporter::default(),
            FakeArchiver {
                fail: true,
                ..FakeArchiver::default()
            },
        );
        let task = task(1, &["vm1"]);
        h.orchestrator.load_task(task.clone()).unwrap();

        let err = h
            .orchestrator
            .run_pipeline(&task.virtual_machines[0])
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::ExternalOperation { .. }));
        assert_eq!(h.remover.calls.lock().unwrap().len(), 1);
        assert_eq!(task.virtual_machines[0].runtime.status(), MachineStatus::Idle);
    }

    #[tokio::test]
    async fn test_unknown_schedule_is_dropped() {
        let h = harness(FakeExporter::default(), FakeArchiver::default());
        let old = task(1, &["vm1"]);
        h.orchestrator.load_task(old).unwrap();
        let stale = fire_all(&h.orchestrator, &["vm1"]);

        // 重新加载后旧计划的标识失效
        h.orchestrator.load_task(task(1, &["vm1"])).unwrap();
        h.orchestrator.on_fire(stale);
        h.orchestrator.wait_idle().await;

        assert!(h.exporter.calls.lock().unwrap().is_empty());
        assert_eq!(h.orchestrator.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_load_task_rejects_empty_and_skips_invalid() {
        let h = harness(FakeExporter::default(), FakeArchiver::default());
        h.orchestrator.load_task(task(1, &["vm1"])).unwrap();

        let empty = Arc::new(BackupTask::new(1, Vec::new()));
        assert!(h.orchestrator.load_task(empty).unwrap_err().is_validation());
        assert_eq!(h.orchestrator.schedules().len(), 2);

        let json = r#"{"ParallelBackups": 1, "VirtualMachines": [{"VmName": "vm9",
            "ExportPathTemplate": "/b/{GUEST_FULL}",
            "BackupSchedules": [
                {"Type": "Daily", "OccursOnceAt": "25:00"},
                {"Type": "Daily", "OccursOnceAt": "03:00", "IntervalUnit": "minute", "Interval": 5},
                {"Type": "Weekly", "OccursOnceAt": "03:00", "DaysOfWeek": ["Monday"]}
            ]}]}"#;
        let loaded = h
            .orchestrator
            .load_task(Arc::new(BackupTask::from_json(json).unwrap()))
            .unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(h.orchestrator.schedules()[0].0, "vm9");
    }

    #[tokio::test]
    async fn test_stop_rejects_new_fires() {
        let h = harness(FakeExporter::default(), FakeArchiver::default());
        h.orchestrator.load_task(task(1, &["vm1"])).unwrap();
        let batch = fire_all(&h.orchestrator, &["vm1"]);

        h.orchestrator.stop();
        h.orchestrator.on_fire(batch);
        h.orchestrator.wait_idle().await;
        assert!(h.exporter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_export_template() {
        let h = harness(FakeExporter::default(), FakeArchiver::default());
        let vm = Arc::new(VirtualMachine::new("bare"));
        let err = h.orchestrator.run_pipeline(&vm).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(vm.runtime.status(), MachineStatus::Idle);
        assert!(h.exporter.calls.lock().unwrap().is_empty());
    }
}
