use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

/// 单台虚拟机在一个批次中的失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineFailure {
    pub machine: String,
    pub message: String,
}

impl fmt::Display for MachineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.machine, self.message)
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("找不到计划所属的虚拟机: {0}")]
    Lookup(String),

    #[error("虚拟机 '{machine}' 外部操作失败: {message}")]
    ExternalOperation { machine: String, message: String },

    #[error("批次中有 {} 台虚拟机备份失败: {}", .0.len(), join_failures(.0))]
    Aggregate(Vec<MachineFailure>),

    #[error("任务同步失败: {0}")]
    Sync(String),

    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置序列化错误: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("ZIP 文件错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("配置文件未找到")]
    ConfigNotFound,
}

fn join_failures(failures: &[MachineFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BackupError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    pub fn external(machine: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ExternalOperation {
            machine: machine.into(),
            message: msg.into(),
        }
    }

    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    /// 是否为构造期的校验错误
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
