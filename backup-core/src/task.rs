//! 备份任务模型
//!
//! `BackupTask` 和 `VirtualMachine` 的配置字段可序列化，与中央服务器的任务 JSON 格式一致；
//! 运行时字段（状态、进度、时间戳）不参与序列化，也不参与相等比较。

use crate::error::{BackupError, Result};
use crate::schedule::ScheduleConfig;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// 虚拟机备份状态
///
/// 流水线成功结束后为 `Completed`，进度上报器报告一次后将其置回 `Idle`。
/// `Canceled` 只为兼容中央服务器的状态编号而保留，代理自身不会取消正在执行的备份。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineStatus {
    Idle = 0,
    Exporting = 1,
    Archiving = 2,
    Rotating = 3,
    Completed = 4,
    Canceled = 5,
}

impl MachineStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MachineStatus::Exporting,
            2 => MachineStatus::Archiving,
            3 => MachineStatus::Rotating,
            4 => MachineStatus::Completed,
            5 => MachineStatus::Canceled,
            _ => MachineStatus::Idle,
        }
    }

    /// 是否处于会更新进度的阶段
    pub fn is_active(&self) -> bool {
        matches!(self, MachineStatus::Exporting | MachineStatus::Archiving)
    }
}

/// 任务整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Idle,
    Active,
}

/// 时间戳以毫秒存放在原子变量中，0 表示未设置
#[derive(Debug, Default)]
struct AtomicTimestamp(AtomicI64);

impl AtomicTimestamp {
    fn get(&self) -> Option<DateTime<Local>> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis).map(|t| t.with_timezone(&Local)),
        }
    }

    fn set(&self, value: DateTime<Local>) {
        self.0.store(value.timestamp_millis(), Ordering::Release);
    }

    fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// 虚拟机的运行时状态
///
/// 除 `Completed -> Idle` 的比较交换外，所有字段只由流水线工作者写入，
/// 读者不加锁，只会看到某一时刻的完整值。
#[derive(Debug, Default)]
pub struct MachineRuntime {
    status: AtomicU8,
    export_percent: AtomicU8,
    archive_percent: AtomicU8,
    backup_start: AtomicTimestamp,
    backup_end: AtomicTimestamp,
    last_backup: AtomicTimestamp,
    export_path: RwLock<Option<PathBuf>>,
    archive_path: RwLock<Option<PathBuf>>,
}

impl MachineRuntime {
    pub fn status(&self) -> MachineStatus {
        MachineStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: MachineStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// `Completed` 置回 `Idle`；状态已被新一轮备份改写时不做修改
    pub fn settle_completed(&self) -> bool {
        self.status
            .compare_exchange(
                MachineStatus::Completed as u8,
                MachineStatus::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn export_percent(&self) -> u8 {
        self.export_percent.load(Ordering::Acquire)
    }

    pub fn set_export_percent(&self, percent: u8) {
        self.export_percent.store(percent.min(100), Ordering::Release);
    }

    pub fn archive_percent(&self) -> u8 {
        self.archive_percent.load(Ordering::Acquire)
    }

    pub fn set_archive_percent(&self, percent: u8) {
        self.archive_percent.store(percent.min(100), Ordering::Release);
    }

    pub fn backup_start(&self) -> Option<DateTime<Local>> {
        self.backup_start.get()
    }

    pub fn backup_end(&self) -> Option<DateTime<Local>> {
        self.backup_end.get()
    }

    pub fn last_backup(&self) -> Option<DateTime<Local>> {
        self.last_backup.get()
    }

    /// 新一轮备份开始：记录开始时间，清空结束时间和进度
    pub fn begin_run(&self, now: DateTime<Local>) {
        self.backup_start.set(now);
        self.backup_end.clear();
        self.set_export_percent(0);
        self.set_archive_percent(0);
    }

    pub fn stamp_end(&self, now: DateTime<Local>) {
        self.backup_end.set(now);
    }

    pub fn stamp_last_backup(&self, now: DateTime<Local>) {
        self.last_backup.set(now);
    }

    pub fn export_path(&self) -> Option<PathBuf> {
        self.export_path
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_export_path(&self, path: Option<PathBuf>) {
        *self.export_path.write().unwrap_or_else(|e| e.into_inner()) = path;
    }

    pub fn archive_path(&self) -> Option<PathBuf> {
        self.archive_path
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_archive_path(&self, path: Option<PathBuf>) {
        *self.archive_path.write().unwrap_or_else(|e| e.into_inner()) = path;
    }
}

/// 单台虚拟机的备份配置
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VirtualMachine {
    pub vm_name: String,
    #[serde(default)]
    pub export_path_template: String,
    #[serde(default)]
    pub export_rotate_days: u32,
    #[serde(default)]
    pub create_archive: bool,
    #[serde(default)]
    pub archive_path_template: String,
    #[serde(default)]
    pub archive_compression_level: u8,
    #[serde(default)]
    pub archive_rotate_days: u32,
    #[serde(default)]
    pub backup_schedules: Vec<ScheduleConfig>,
    #[serde(skip)]
    pub runtime: MachineRuntime,
}

impl VirtualMachine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            vm_name: name.into(),
            export_path_template: String::new(),
            export_rotate_days: 0,
            create_archive: false,
            archive_path_template: String::new(),
            archive_compression_level: 0,
            archive_rotate_days: 0,
            backup_schedules: Vec::new(),
            runtime: MachineRuntime::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.vm_name
    }

    /// 是否需要执行轮转阶段
    pub fn needs_rotation(&self) -> bool {
        self.export_rotate_days > 0 || self.archive_rotate_days > 0
    }

    /// 当前状态的快照
    pub fn snapshot(&self) -> BackupState {
        let runtime = &self.runtime;
        let status = runtime.status();
        let percent = match status {
            MachineStatus::Exporting => runtime.export_percent(),
            MachineStatus::Archiving => runtime.archive_percent(),
            MachineStatus::Completed => 100,
            _ => 0,
        };

        BackupState {
            vm_name: self.vm_name.clone(),
            backup_start: runtime.backup_start(),
            backup_end: runtime.backup_end(),
            status,
            percent,
            export_path: runtime.export_path().map(path_string),
            archive_path: runtime.archive_path().map(path_string),
            last_backup: runtime.last_backup(),
        }
    }
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

/// 只比较配置字段
impl PartialEq for VirtualMachine {
    fn eq(&self, other: &Self) -> bool {
        self.vm_name == other.vm_name
            && self.export_path_template == other.export_path_template
            && self.export_rotate_days == other.export_rotate_days
            && self.create_archive == other.create_archive
            && self.archive_path_template == other.archive_path_template
            && self.archive_compression_level == other.archive_compression_level
            && self.archive_rotate_days == other.archive_rotate_days
            && self.backup_schedules == other.backup_schedules
    }
}

impl Eq for VirtualMachine {}

#[derive(Debug, Default)]
struct TaskRuntime {
    active: AtomicU8,
    last_executed: AtomicTimestamp,
}

/// 备份任务：并行度加上所有虚拟机的备份配置
///
/// 任务一旦发布就不再修改，检测到变化时整体替换。
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupTask {
    #[serde(default)]
    pub parallel_backups: usize,
    #[serde(default)]
    pub virtual_machines: Vec<Arc<VirtualMachine>>,
    #[serde(skip)]
    runtime: TaskRuntime,
}

impl PartialEq for BackupTask {
    fn eq(&self, other: &Self) -> bool {
        self.parallel_backups == other.parallel_backups
            && self.virtual_machines == other.virtual_machines
    }
}

impl Eq for BackupTask {}

impl BackupTask {
    pub fn new(parallel_backups: usize, virtual_machines: Vec<VirtualMachine>) -> Self {
        Self {
            parallel_backups,
            virtual_machines: virtual_machines.into_iter().map(Arc::new).collect(),
            runtime: TaskRuntime::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn is_empty(&self) -> bool {
        self.virtual_machines.is_empty()
    }

    pub fn machine(&self, name: &str) -> Option<&Arc<VirtualMachine>> {
        self.virtual_machines
            .iter()
            .find(|vm| vm.vm_name.eq_ignore_ascii_case(name))
    }

    pub fn require_machine(&self, name: &str) -> Result<Arc<VirtualMachine>> {
        self.machine(name)
            .cloned()
            .ok_or_else(|| BackupError::lookup(format!("任务中没有虚拟机 '{name}'")))
    }

    pub fn machine_names(&self) -> Vec<String> {
        self.virtual_machines
            .iter()
            .map(|vm| vm.vm_name.clone())
            .collect()
    }

    pub fn status(&self) -> TaskStatus {
        if self.runtime.active.load(Ordering::Acquire) == 0 {
            TaskStatus::Idle
        } else {
            TaskStatus::Active
        }
    }

    pub fn set_status(&self, status: TaskStatus) {
        let value = match status {
            TaskStatus::Idle => 0,
            TaskStatus::Active => 1,
        };
        self.runtime.active.store(value, Ordering::Release);
    }

    pub fn last_executed(&self) -> Option<DateTime<Local>> {
        self.runtime.last_executed.get()
    }

    pub fn stamp_executed(&self, now: DateTime<Local>) {
        self.runtime.last_executed.set(now);
    }

    /// 所有虚拟机的状态快照
    pub fn snapshot(&self) -> Vec<BackupState> {
        self.virtual_machines.iter().map(|vm| vm.snapshot()).collect()
    }
}

/// 对外上报的虚拟机状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupState {
    pub vm_name: String,
    #[serde(rename = "BackupStartDate")]
    pub backup_start: Option<DateTime<Local>>,
    #[serde(rename = "BackupEndDate")]
    pub backup_end: Option<DateTime<Local>>,
    pub status: MachineStatus,
    #[serde(rename = "PercentComplete")]
    pub percent: u8,
    #[serde(rename = "ExportedToFolder")]
    pub export_path: Option<String>,
    #[serde(rename = "ArchivedToFile")]
    pub archive_path: Option<String>,
    pub last_backup: Option<DateTime<Local>>,
}
