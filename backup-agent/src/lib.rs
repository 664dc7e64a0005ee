// 私有模块声明
mod app;
mod cli;
mod commands;
pub mod project_info;
mod utils;

// 通过 pub use 精确控制对外暴露的接口
pub use app::AgentApp;
pub use cli::{Cli, Commands, ScheduleCommand, TaskCommand};
pub use commands::run_init;
pub use utils::{resolve_log_dir, setup_logging};
