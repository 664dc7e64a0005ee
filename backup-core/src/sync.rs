//! 任务同步
//!
//! 按顺序尝试：中央服务器（可达时） -> 本地任务文件 -> 根据宿主机上的虚拟机生成默认任务。
//! 只有配置字段发生变化时才替换当前任务并发出通知。

use crate::api::ApiResult;
use crate::constants::task::{
    DEFAULT_ARCHIVE_ROTATE_DAYS, DEFAULT_ARCHIVE_TEMPLATE, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_EXPORT_ROTATE_DAYS, DEFAULT_EXPORT_TEMPLATE, PLACEHOLDER_SCHEDULE_DESCRIPTION,
    PLACEHOLDER_SCHEDULE_TIME,
};
use crate::error::{BackupError, Result};
use crate::ops::MachineInventory;
use crate::schedule::ScheduleConfig;
use crate::task::{BackupTask, VirtualMachine};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 远端任务来源
#[async_trait::async_trait]
pub trait TaskSource: Send + Sync {
    async fn reachable(&self) -> bool;

    /// 获取主机的任务；服务器上没有该主机的任务时返回 None
    async fn fetch_task(&self, hypervisor: &str) -> Result<Option<BackupTask>>;
}

/// 向远端登记主机信息
#[async_trait::async_trait]
pub trait HostRegistrar: Send + Sync {
    async fn register(
        &self,
        hypervisor: &str,
        machines: Vec<String>,
        task: &BackupTask,
    ) -> Result<ApiResult>;
}

/// 当前生效的备份任务
///
/// 任务只会被整体替换，读者拿到的总是一个完整的任务。
#[derive(Debug, Default)]
pub struct ActiveTask {
    inner: RwLock<Option<Arc<BackupTask>>>,
}

impl ActiveTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<BackupTask>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 替换当前任务，返回被替换的旧任务
    pub fn replace(&self, task: Arc<BackupTask>) -> Option<Arc<BackupTask>> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task)
    }
}

/// 本地任务文件
#[derive(Debug, Clone)]
pub struct LocalTaskStore {
    path: PathBuf,
}

impl LocalTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在时返回 None
    pub fn load(&self) -> Result<Option<BackupTask>> {
        if !self.path.exists() {
            return Ok(None);
        }
        BackupTask::load_from_file(&self.path).map(Some)
    }

    pub fn save(&self, task: &BackupTask) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, task.to_json()?)?;
        Ok(())
    }
}

/// 为新发现的虚拟机生成默认配置，计划处于禁用状态，需人工确认后启用
pub fn default_machine(name: &str) -> VirtualMachine {
    let mut placeholder = ScheduleConfig::daily_once(PLACEHOLDER_SCHEDULE_TIME);
    placeholder.enabled = false;
    placeholder.description = Some(PLACEHOLDER_SCHEDULE_DESCRIPTION.to_string());

    let mut vm = VirtualMachine::new(name);
    vm.export_path_template = DEFAULT_EXPORT_TEMPLATE.to_string();
    vm.export_rotate_days = DEFAULT_EXPORT_ROTATE_DAYS;
    vm.create_archive = true;
    vm.archive_path_template = DEFAULT_ARCHIVE_TEMPLATE.to_string();
    vm.archive_compression_level = DEFAULT_COMPRESSION_LEVEL;
    vm.archive_rotate_days = DEFAULT_ARCHIVE_ROTATE_DAYS;
    vm.backup_schedules = vec![placeholder];
    vm
}

/// 任务同步服务
pub struct TaskSync {
    hypervisor: String,
    default_parallel: usize,
    store: LocalTaskStore,
    active: Arc<ActiveTask>,
    remote: Option<Arc<dyn TaskSource>>,
    inventory: Option<Arc<dyn MachineInventory>>,
    registrar: Option<Arc<dyn HostRegistrar>>,
    changes: mpsc::UnboundedSender<Arc<BackupTask>>,
}

impl TaskSync {
    pub fn new(
        hypervisor: impl Into<String>,
        default_parallel: usize,
        store: LocalTaskStore,
        active: Arc<ActiveTask>,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<BackupTask>>) {
        let (changes, receiver) = mpsc::unbounded_channel();
        let sync = Self {
            hypervisor: hypervisor.into(),
            default_parallel,
            store,
            active,
            remote: None,
            inventory: None,
            registrar: None,
            changes,
        };
        (sync, receiver)
    }

    pub fn with_remote(mut self, remote: Arc<dyn TaskSource>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_inventory(mut self, inventory: Arc<dyn MachineInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn HostRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn active(&self) -> &Arc<ActiveTask> {
        &self.active
    }

    pub fn store(&self) -> &LocalTaskStore {
        &self.store
    }

    /// 刷新一次，返回任务是否发生变化
    ///
    /// 获取失败或得到空任务时保留当前任务和本地文件，由下一个周期重试。
    pub async fn refresh(&self) -> Result<bool> {
        let candidate = self.obtain_candidate().await?;
        if candidate.is_empty() {
            return Err(BackupError::sync("备份任务中没有虚拟机，忽略"));
        }

        if let Some(current) = self.active.current() {
            if *current == candidate {
                debug!("备份任务未变化");
                return Ok(false);
            }
        }

        if let Err(e) = self.store.save(&candidate) {
            warn!(path = %self.store.path().display(), error = %e, "保存本地任务文件失败");
        }

        let task = Arc::new(candidate);
        self.active.replace(Arc::clone(&task));
        info!(
            machines = task.virtual_machines.len(),
            parallel = task.parallel_backups,
            "备份任务已更新"
        );

        if self.changes.send(Arc::clone(&task)).is_err() {
            warn!("任务变更通知的接收端已关闭");
        }

        self.register_host().await;
        Ok(true)
    }

    async fn obtain_candidate(&self) -> Result<BackupTask> {
        if let Some(remote) = &self.remote {
            if remote.reachable().await {
                match remote.fetch_task(&self.hypervisor).await {
                    Ok(Some(task)) => return Ok(task),
                    Ok(None) => info!(hypervisor = %self.hypervisor, "中央服务器上没有该主机的任务"),
                    Err(e) => warn!(error = %e, "从中央服务器获取任务失败"),
                }
            } else {
                debug!("中央服务器不可达，使用本地任务");
            }
        }

        match self.store.load() {
            Ok(Some(task)) => return Ok(task),
            Ok(None) => debug!(path = %self.store.path().display(), "本地任务文件不存在"),
            Err(e) => warn!(path = %self.store.path().display(), error = %e, "本地任务文件无法读取"),
        }

        self.default_task().await
    }

    /// 根据宿主机上的虚拟机生成默认任务
    async fn default_task(&self) -> Result<BackupTask> {
        let inventory = self
            .inventory
            .as_ref()
            .ok_or_else(|| BackupError::sync("没有可用的任务来源"))?;

        let names = inventory
            .list_machines()
            .await
            .map_err(|e| BackupError::sync(format!("无法列出虚拟机: {e}")))?;
        if names.is_empty() {
            return Err(BackupError::sync("宿主机上没有发现虚拟机"));
        }

        info!(machines = names.len(), "生成默认备份任务，计划均为禁用状态");
        let machines = names.iter().map(|name| default_machine(name)).collect();
        Ok(BackupTask::new(self.default_parallel, machines))
    }

    /// 向中央服务器登记主机和当前任务；失败只记录日志
    pub async fn register_host(&self) {
        let (Some(registrar), Some(task)) = (&self.registrar, self.active.current()) else {
            return;
        };

        let machines = match &self.inventory {
            Some(inventory) => match inventory.list_machines().await {
                Ok(names) => names,
                Err(e) => {
                    warn!(error = %e, "无法列出虚拟机，使用任务中的名称");
                    task.machine_names()
                }
            },
            None => task.machine_names(),
        };

        match registrar.register(&self.hypervisor, machines, &task).await {
            Ok(result) if result.success => info!(hypervisor = %self.hypervisor, "主机信息已登记"),
            Ok(result) => warn!(
                reason = result.message.as_deref().unwrap_or_default(),
                "登记主机信息失败"
            ),
            Err(e) => warn!(error = %e, "登记主机信息失败"),
        }
    }

    /// 按固定周期刷新，直到取消
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("任务同步已停止");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!(error = %e, "刷新备份任务失败，保留当前任务");
                    }
                }
            }
        }
    }
}
