use super::MachineInventory;
use super::export::run_program;
use crate::error::{BackupError, Result};

/// 通过外部命令列出虚拟机，每行一个名称
#[derive(Debug, Clone)]
pub struct CommandInventory {
    program: String,
    args: Vec<String>,
}

impl CommandInventory {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

fn parse_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait::async_trait]
impl MachineInventory for CommandInventory {
    async fn list_machines(&self) -> Result<Vec<String>> {
        let output = run_program("inventory", &self.program, &self.args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackupError::external(
                "inventory",
                format!("列出虚拟机失败 {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(parse_names(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_skips_blank_lines() {
        assert_eq!(
            parse_names("vm1\r\n\n  vm2  \n\n"),
            vec!["vm1".to_string(), "vm2".to_string()]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_machines() {
        let inventory = CommandInventory::new("sh", vec!["-c".to_string(), "printf 'a\\nb\\n'".to_string()]);
        assert_eq!(inventory.list_machines().await.unwrap(), vec!["a", "b"]);
    }
}
