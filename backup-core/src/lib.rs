pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod ops;
pub mod orchestrator;
pub mod reporter;
pub mod schedule;
pub mod sync;
pub mod task;
pub mod template;

pub use error::{BackupError, Result};
