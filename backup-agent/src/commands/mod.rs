mod backup;
mod init;
mod run;
mod schedule;
mod task;

pub use backup::backup_machine;
pub use init::run_init;
pub use run::run_service;
pub use schedule::preview_schedules;
pub use task::{refresh_task, show_task, validate_task};
