//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file; every section falls back to defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding `jobs.json` and `state.json`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum simultaneously running jobs (0 = unlimited)
    #[serde(default)]
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Path to the external encryption/decryption executable
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// File extensions routed through the helper (".enc", "docx", ...)
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Kill the helper after this many seconds
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,

    /// Pause between two helper invocations
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Also write `hash.json` during full backups
    #[serde(default = "default_write_hash_index")]
    pub write_hash_index_on_full: bool,

    /// File name fragments skipped during traversal
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_data_dir() -> PathBuf {
    PathBuf::from("./backup-engine-data")
}

fn default_executable() -> PathBuf {
    PathBuf::from("CryptoSoft")
}

fn default_process_timeout_secs() -> u64 {
    240
}

fn default_cooldown_ms() -> u64 {
    200
}

fn default_write_hash_index() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_concurrent_jobs: 0,
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            extensions: Vec::new(),
            process_timeout_secs: default_process_timeout_secs(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            write_hash_index_on_full: default_write_hash_index(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.engine.data_dir.join("jobs.json")
    }

    pub fn state_file(&self) -> PathBuf {
        self.engine.data_dir.join("state.json")
    }
}

impl EncryptionConfig {
    /// Configured extensions, lowercased and dot-prefixed.
    pub fn extensions(&self) -> HashSet<String> {
        self.extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .filter(|ext| ext.len() > 1)
            .collect()
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
