//! Per-run progress accounting.
//!
//! Turns "file N of M done" into the [`StateEntry`] snapshots published while
//! a job is active.

use std::path::Path;

use crate::state::{JobStatus, StateEntry};

/// Progress of one run over its selected file set.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    job_name: String,
    total_files: usize,
    total_bytes: u64,
    processed_files: usize,
    processed_bytes: u64,
}

impl ProgressTracker {
    pub fn new(job_name: impl Into<String>, total_files: usize, total_bytes: u64) -> Self {
        Self {
            job_name: job_name.into(),
            total_files,
            total_bytes,
            processed_files: 0,
            processed_bytes: 0,
        }
    }

    /// Count one file as handled, whether it succeeded or not.
    pub fn record(&mut self, size: u64) {
        self.processed_files += 1;
        self.processed_bytes = self.processed_bytes.saturating_add(size);
    }

    pub fn remaining_files(&self) -> usize {
        self.total_files.saturating_sub(self.processed_files)
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.processed_bytes)
    }

    /// Byte-weighted percentage; falls back to file count for empty files and
    /// reports 100 when there is nothing to do.
    pub fn percent(&self) -> f64 {
        let percent = if self.total_bytes > 0 {
            self.processed_bytes as f64 / self.total_bytes as f64 * 100.0
        } else if self.total_files > 0 {
            self.processed_files as f64 / self.total_files as f64 * 100.0
        } else {
            100.0
        };
        percent.clamp(0.0, 100.0)
    }

    /// Active-state snapshot naming the file currently being handled.
    pub fn entry(&self, current_source: Option<&Path>, current_dest: Option<&Path>) -> StateEntry {
        let mut entry = StateEntry::new(self.job_name.clone(), JobStatus::Active);
        entry.total_files = Some(self.total_files);
        entry.total_bytes = Some(self.total_bytes);
        entry.progress_percent = Some(self.percent());
        entry.remaining_files = Some(self.remaining_files());
        entry.remaining_bytes = Some(self.remaining_bytes());
        entry.current_source_path = current_source.map(Path::to_path_buf);
        entry.current_dest_path = current_dest.map(Path::to_path_buf);
        entry
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
