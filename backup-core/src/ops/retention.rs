use super::{RemovalSummary, Remover};
use crate::error::Result;
use crate::task::VirtualMachine;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// 按保留天数删除过期的导出目录和归档文件
///
/// 导出目录在导出路径的上级目录中查找，归档文件在归档路径的上级目录中查找，
/// 修改时间距今不少于保留天数的条目被删除。保留天数为 0 表示不删除。
#[derive(Debug, Clone, Default)]
pub struct RetentionRemover;

impl RetentionRemover {
    pub fn new() -> Self {
        Self
    }

    /// 以给定时间为基准执行轮转
    pub fn remove_at(
        &self,
        machine: &VirtualMachine,
        export_path: &Path,
        archive_path: Option<&Path>,
        now: SystemTime,
    ) -> RemovalSummary {
        let mut summary = RemovalSummary::default();

        if machine.export_rotate_days > 0 {
            match remove_expired(export_path, machine.export_rotate_days, now, EntryKind::Dir) {
                Ok(count) => summary.removed_export_dirs = count,
                Err(e) => error!(machine = %machine.name(), error = %e, "删除过期导出目录失败"),
            }
        }

        if machine.archive_rotate_days > 0 {
            match archive_path {
                Some(path) => {
                    match remove_expired(path, machine.archive_rotate_days, now, EntryKind::File) {
                        Ok(count) => summary.removed_archive_files = count,
                        Err(e) => {
                            error!(machine = %machine.name(), error = %e, "删除过期归档文件失败")
                        }
                    }
                }
                None => warn!(machine = %machine.name(), "没有归档路径，跳过归档轮转"),
            }
        }

        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
}

/// 删除 `path` 的同级条目中过期的目录或文件
fn remove_expired(path: &Path, days: u32, now: SystemTime, kind: EntryKind) -> Result<usize> {
    let Some(parent) = path.parent().filter(|p| p.is_dir()) else {
        return Ok(0);
    };

    let max_age = Duration::from_secs(u64::from(days) * SECS_PER_DAY);
    let mut removed = 0;

    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let matches = match kind {
            EntryKind::Dir => file_type.is_dir(),
            EntryKind::File => file_type.is_file(),
        };
        if !matches {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        // 修改时间在未来的条目视为未过期
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }

        let target = entry.path();
        match kind {
            EntryKind::Dir => {
                info!(path = %target.display(), "删除过期导出目录");
                std::fs::remove_dir_all(&target)?;
            }
            EntryKind::File => {
                info!(path = %target.display(), "删除过期归档文件");
                std::fs::remove_file(&target)?;
            }
        }
        removed += 1;
    }

    Ok(removed)
}

#[async_trait::async_trait]
impl Remover for RetentionRemover {
    async fn remove_old_backups(
        &self,
        machine: &Arc<VirtualMachine>,
        export_path: &Path,
        archive_path: Option<&Path>,
    ) -> RemovalSummary {
        let remover = self.clone();
        let vm = Arc::clone(machine);
        let export = export_path.to_path_buf();
        let archive = archive_path.map(Path::to_path_buf);

        let result = tokio::task::spawn_blocking(move || {
            remover.remove_at(&vm, &export, archive.as_deref(), SystemTime::now())
        })
        .await;

        match result {
            Ok(summary) => summary,
            Err(e) => {
                error!(machine = %machine.name(), error = %e, "轮转任务异常退出");
                RemovalSummary::default()
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::PathBuf;

    fn days_ago(days: u64) -> SystemTime {
        SystemTime::now() - Duration::from_secs(days * SECS_PER_DAY + 60)
    }

    fn touch(path: &Path, modified: SystemTime) {
        File::open(path).unwrap().set_modified(modified).unwrap();
    }

    fn make_dir(root: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("disk.vhdx"), b"x").unwrap();
        touch(&dir, modified);
        dir
    }

    fn make_file(root: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let file = root.join(name);
        std::fs::write(&file, b"zip").unwrap();
        touch(&file, modified);
        file
    }

    #[test]
    fn test_export_retention_zero_never_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let exports = dir.path().join("exports");
        let old = make_dir(&exports, "Daily_old", days_ago(400));
        let current = exports.join("Daily_new");

        let mut vm = VirtualMachine::new("vm1");
        vm.export_rotate_days = 0;
        vm.archive_rotate_days = 0;

        let summary = RetentionRemover::new().remove_at(&vm, &current, None, SystemTime::now());
        assert_eq!(summary, RemovalSummary::default());
        assert!(old.exists());
    }

    #[test]
    fn test_archive_retention_only_touches_archives() {
        let dir = tempfile::tempdir().unwrap();
        let exports = dir.path().join("exports");
        let archives = dir.path().join("archives");
        std::fs::create_dir_all(&archives).unwrap();

        let old_export = make_dir(&exports, "Daily_old", days_ago(30));
        let old_archive = make_file(&archives, "old.zip", days_ago(6));
        let young_archive = make_file(&archives, "young.zip", days_ago(4));

        let mut vm = VirtualMachine::new("vm1");
        vm.export_rotate_days = 0;
        vm.archive_rotate_days = 5;

        let summary = RetentionRemover::new().remove_at(
            &vm,
            &exports.join("Daily_new"),
            Some(&archives.join("new.zip")),
            SystemTime::now(),
        );

        assert_eq!(summary.removed_export_dirs, 0);
        assert_eq!(summary.removed_archive_files, 1);
        assert!(!old_archive.exists());
        assert!(young_archive.exists());
        assert!(old_export.exists());
    }

    #[test]
    fn test_export_retention_deletes_old_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let exports = dir.path().join("exports");
        let old = make_dir(&exports, "Daily_old", days_ago(3));
        let recent = make_dir(&exports, "Daily_recent", days_ago(1));

        let mut vm = VirtualMachine::new("vm1");
        vm.export_rotate_days = 2;

        let summary =
            RetentionRemover::new().remove_at(&vm, &recent, None, SystemTime::now());
        assert_eq!(summary.removed_export_dirs, 1);
        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[tokio::test]
    async fn test_missing_parent_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = VirtualMachine::new("vm1");
        vm.export_rotate_days = 1;
        vm.archive_rotate_days = 1;
        let vm = Arc::new(vm);

        let summary = RetentionRemover::new()
            .remove_old_backups(
                &vm,
                &dir.path().join("nope").join("x"),
                Some(&dir.path().join("nada").join("y.zip")),
            )
            .await;
        assert_eq!(summary, RemovalSummary::default());
    }
}
