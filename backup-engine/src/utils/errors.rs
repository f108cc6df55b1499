//! Custom error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing helper executable or an unusable configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Job input rejected before any file work started.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The external encryption helper failed (spawn failure, non-zero exit, crash).
    #[error("External process error (code {code}): {message}")]
    ExternalProcess { code: i64, message: String },

    #[error("Timed out waiting for the encryption helper")]
    QueueTimeout,

    #[error("A job named '{0}' already exists")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
