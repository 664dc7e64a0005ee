/// 项目元数据（自动从 Cargo.toml 同步）
pub mod metadata {
    pub const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

    pub const PROJECT_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

    pub const PROJECT_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

    /// 项目详细描述
    pub const DESCRIPTION_LONG: &str = "按照中央服务器下发（或本地保存）的备份任务，定时导出宿主机上的虚拟机，\
        压缩为 ZIP 归档并删除过期备份，同时向中央服务器汇报进度";
}

/// 版本信息
pub mod version_info {
    /// 代理版本（自动从 Cargo.toml 同步）
    pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// 核心库版本（从 backup-core 获取）
    pub const CORE_VERSION: &str = backup_core::constants::version::CORE_VERSION;
}

/// 启动时显示的版本信息
pub fn get_version_string() -> String {
    format!(
        "{} v{} (core v{})",
        metadata::PROJECT_NAME,
        version_info::AGENT_VERSION,
        version_info::CORE_VERSION
    )
}
