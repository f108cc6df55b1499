//! Backup Engine Library
//!
//! Full and differential file-tree backups. Selected file types are handed
//! to a single-instance external encryption helper through a FIFO queue, and
//! per-job progress is persisted for other processes to observe.

pub mod config;
pub mod crypto;
pub mod events;
pub mod executor;
pub mod fs;
pub mod jobs;
pub mod orchestrator;
pub mod state;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use executor::BackupReport;
pub use jobs::{BackupJob, BackupType, JobId};
pub use orchestrator::BackupOrchestrator;
pub use state::{JobStatus, StateEntry};
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;
