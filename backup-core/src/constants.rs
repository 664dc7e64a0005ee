/// 调度相关常量
pub mod schedule {
    /// 调度器时钟周期（秒），也是调度的最小分辨率
    pub const TICK_INTERVAL_SECS: u64 = 1;

    /// 未设置起始时间时的活动区间起点 00:00:00
    pub const DEFAULT_SPAN_START: (u32, u32, u32) = (0, 0, 0);

    /// 未设置结束时间时的活动区间终点 23:59:59
    pub const DEFAULT_SPAN_END: (u32, u32, u32) = (23, 59, 59);

    /// "每月最后一天" 的兼容数值（旧任务文件使用 int.MaxValue 表示）
    pub const LAST_DAY_OF_MONTH_LEGACY: i64 = 2_147_483_647;

    /// 月度计划向后查找可用日期的最大月数
    pub const MONTH_SEARCH_LIMIT: u32 = 48;
}

/// 备份任务相关常量
pub mod task {
    /// 默认任务文件名
    pub const DEFAULT_TASK_FILE: &str = "backup-task.json";

    /// 默认并行备份数
    pub const DEFAULT_PARALLEL_BACKUPS: usize = 1;

    /// 新发现虚拟机的默认导出路径模板
    pub const DEFAULT_EXPORT_TEMPLATE: &str =
        "C:\\Backup\\{HOST_FULL}\\{GUEST_FULL}\\Daily_{YEAR}_{MONTH}_{DAY}_{HOUR}_{MINUTE}";

    /// 新发现虚拟机的默认归档路径模板
    pub const DEFAULT_ARCHIVE_TEMPLATE: &str = "C:\\Backup\\{HOST_FULL}\\{GUEST_FULL}\\{HOST_SHORT}_VM_{GUEST_FULL}_export_{YEAR}.{MONTH}.{DAY}.{HOUR}.{MINUTE}.zip";

    /// 默认导出保留天数
    pub const DEFAULT_EXPORT_ROTATE_DAYS: u32 = 2;

    /// 默认归档保留天数
    pub const DEFAULT_ARCHIVE_ROTATE_DAYS: u32 = 5;

    /// 默认压缩级别（最快）
    pub const DEFAULT_COMPRESSION_LEVEL: u8 = 1;

    /// 占位计划的触发时间
    pub const PLACEHOLDER_SCHEDULE_TIME: &str = "00:00";

    /// 占位计划说明
    pub const PLACEHOLDER_SCHEDULE_DESCRIPTION: &str =
        "This schedule is disabled. Check Backup Task properties and after that enable this schedule.";
}

/// 中央服务器接口相关常量
pub mod api {
    /// API端点路径
    pub mod endpoints {
        /// 存活探测
        pub const PING: &str = "/api/ping";

        /// 上报主机信息
        pub const UPDATE_HYPERVISOR: &str = "/api/UpdateHypervisor";

        /// 上报备份进度
        pub const SEND_BACKUP_PROGRESS: &str = "/api/SendBackupProgress";

        /// 获取备份任务
        pub const GET_BACKUP_TASK: &str = "/api/GetBackupTask";
    }

    /// HTTP相关常量
    pub mod http {
        /// 默认请求超时时间（秒）
        pub const DEFAULT_TIMEOUT: u64 = 30;

        /// 存活探测超时时间（秒）
        pub const PING_TIMEOUT: u64 = 5;

        /// User-Agent头
        pub const USER_AGENT: &str = concat!("backup-agent/", env!("CARGO_PKG_VERSION"));
    }
}

/// 周期任务间隔（秒）
pub mod intervals {
    /// 默认进度上报间隔
    pub const DEFAULT_PROGRESS_REPORT_SECS: u64 = 5;

    /// 默认任务刷新间隔
    pub const DEFAULT_TASK_REFRESH_SECS: u64 = 60;
}

/// 路径模板占位符
pub mod placeholders {
    pub const HOST_FULL: &str = "{HOST_FULL}";
    pub const HOST_SHORT: &str = "{HOST_SHORT}";
    pub const GUEST_FULL: &str = "{GUEST_FULL}";
    pub const GUEST_SHORT: &str = "{GUEST_SHORT}";
    pub const YEAR: &str = "{YEAR}";
    pub const MONTH: &str = "{MONTH}";
    pub const DAY: &str = "{DAY}";
    pub const HOUR: &str = "{HOUR}";
    pub const MINUTE: &str = "{MINUTE}";
    pub const SECOND: &str = "{SECOND}";

    /// 导出命令参数中的导出目录
    pub const EXPORT_PATH: &str = "{EXPORT_PATH}";

    /// 旧版任务文件中的占位符别名
    pub const LEGACY_ALIASES: [(&str, &str); 4] = [
        ("{HV_HOST_FULL}", HOST_FULL),
        ("{HV_HOST_SHORT}", HOST_SHORT),
        ("{HV_GUEST_FULL}", GUEST_FULL),
        ("{HV_GUEST_SHORT}", GUEST_SHORT),
    ];
}

/// 应用配置相关常量
pub mod config {
    use std::path::{Path, PathBuf};

    /// 配置文件名
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// 日志目录环境变量
    pub const LOG_DIR_ENV: &str = "BACKUP_LOG_DIR";

    /// 日志文件名前缀
    pub const LOG_FILE_PREFIX: &str = "backup-agent.log";

    /// 默认导出命令（Hyper-V）
    pub const DEFAULT_EXPORT_PROGRAM: &str = "powershell";

    pub const DEFAULT_EXPORT_ARGS: [&str; 3] = [
        "-NoProfile",
        "-Command",
        "Export-VM -Name '{GUEST_FULL}' -Path '{EXPORT_PATH}'",
    ];

    /// 默认虚拟机清单命令，每行输出一个名称
    pub const DEFAULT_INVENTORY_PROGRAM: &str = "powershell";

    pub const DEFAULT_INVENTORY_ARGS: [&str; 3] = [
        "-NoProfile",
        "-Command",
        "Get-VM | Select-Object -ExpandProperty Name",
    ];

    /// 获取默认配置文件路径
    pub fn get_config_file_path() -> PathBuf {
        Path::new(".").join(CONFIG_FILE_NAME)
    }
}

/// 技术版本信息常量
pub mod version {
    /// 核心库版本（自动同步）
    pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
}
