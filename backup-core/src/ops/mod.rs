//! 备份流水线的外部操作
//!
//! 编排器只依赖这里的 trait，默认实现分别基于外部命令、zip 归档和文件系统。

mod archive;
mod export;
mod inventory;
mod retention;

pub use archive::{ArchiveCompression, ZipArchiver};
pub use export::CommandExporter;
pub use inventory::CommandInventory;
pub use retention::RetentionRemover;

use crate::error::Result;
use crate::task::VirtualMachine;
use std::path::Path;
use std::sync::Arc;

/// 导出虚拟机；耗时较长，执行期间通过 `runtime` 更新导出进度
#[async_trait::async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, machine: &Arc<VirtualMachine>, export_path: &Path) -> Result<()>;
}

/// 把导出目录打包为归档文件
#[async_trait::async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(
        &self,
        machine: &Arc<VirtualMachine>,
        export_path: &Path,
        archive_path: &Path,
    ) -> Result<()>;
}

/// 一次轮转删除的数量
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemovalSummary {
    pub removed_export_dirs: usize,
    pub removed_archive_files: usize,
}

/// 删除过期的导出目录和归档文件；失败由实现自行记录，不向外传播
#[async_trait::async_trait]
pub trait Remover: Send + Sync {
    async fn remove_old_backups(
        &self,
        machine: &Arc<VirtualMachine>,
        export_path: &Path,
        archive_path: Option<&Path>,
    ) -> RemovalSummary;
}

/// 列出宿主机上可备份的虚拟机
#[async_trait::async_trait]
pub trait MachineInventory: Send + Sync {
    async fn list_machines(&self) -> Result<Vec<String>>;
}
