use super::Exporter;
use crate::error::{BackupError, Result};
use crate::schedule::scheduler::local_now;
use crate::task::VirtualMachine;
use crate::template::{HostNames, render_args};
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// 通过外部命令导出虚拟机
///
/// 参数中的占位符按虚拟机展开，`{EXPORT_PATH}` 为本次导出目录。
#[derive(Debug, Clone)]
pub struct CommandExporter {
    program: String,
    args: Vec<String>,
    host: HostNames,
}

impl CommandExporter {
    pub fn new(program: impl Into<String>, args: Vec<String>, host: HostNames) -> Self {
        Self {
            program: program.into(),
            args,
            host,
        }
    }
}

/// 检查程序是否可用后执行，收集标准输出和标准错误
pub(crate) async fn run_program(machine: &str, program: &str, args: &[String]) -> Result<Output> {
    if which::which(program).is_err() {
        return Err(BackupError::external(
            machine,
            format!("程序 '{program}' 未安装或不在 PATH 中"),
        ));
    }

    debug!(machine = %machine, program = %program, ?args, "执行外部命令");
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| BackupError::external(machine, format!("启动 '{program}' 失败: {e}")))
}

#[async_trait::async_trait]
impl Exporter for CommandExporter {
    async fn export(&self, machine: &Arc<VirtualMachine>, export_path: &Path) -> Result<()> {
        let name = machine.name();
        machine.runtime.set_export_percent(0);

        tokio::fs::create_dir_all(export_path).await.map_err(|e| {
            BackupError::external(
                name,
                format!("创建导出目录 {} 失败: {e}", export_path.display()),
            )
        })?;

        let args = render_args(&self.args, &self.host, name, export_path, local_now());
        let output = run_program(name, &self.program, &args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::external(
                name,
                format!("导出命令退出码 {}: {}", output.status, stderr.trim()),
            ));
        }

        machine.runtime.set_export_percent(100);
        info!(machine = %name, path = %export_path.display(), "导出完成");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::task::VirtualMachine;

    fn host() -> HostNames {
        HostNames {
            full: "hv.local".to_string(),
            short: "hv".to_string(),
        }
    }

    #[tokio::test]
    async fn test_export_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let export_path = dir.path().join("vm1").join("today");
        let exporter = CommandExporter::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo {GUEST_FULL} > {EXPORT_PATH}/disk.vhdx".to_string(),
            ],
            host(),
        );
        let vm = Arc::new(VirtualMachine::new("vm1"));

        exporter.export(&vm, &export_path).await.unwrap();

        let content = std::fs::read_to_string(export_path.join("disk.vhdx")).unwrap();
        assert_eq!(content.trim(), "vm1");
        assert_eq!(vm.runtime.export_percent(), 100);
    }

    #[tokio::test]
    async fn test_export_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CommandExporter::new(
            "sh",
            vec!["-c".to_string(), "echo disk locked >&2; exit 3".to_string()],
            host(),
        );
        let vm = Arc::new(VirtualMachine::new("vm1"));

        let err = exporter.export(&vm, dir.path()).await.unwrap_err();
        match err {
            BackupError::ExternalOperation { machine, message } => {
                assert_eq!(machine, "vm1");
                assert!(message.contains("disk locked"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(vm.runtime.export_percent(), 0);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CommandExporter::new("definitely-not-a-real-exporter", vec![], host());
        let vm = Arc::new(VirtualMachine::new("vm1"));
        let err = exporter.export(&vm, dir.path()).await.unwrap_err();
        assert!(matches!(err, BackupError::ExternalOperation { .. }));
    }
}
