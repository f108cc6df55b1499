//! Per-job lifecycle and progress snapshots.

pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use tracker::StateTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Inactive,
    Paused,
}

/// Latest known state of one job. Progress fields are only present while a
/// run is reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub job_name: String,
    pub last_action_time: DateTime<Utc>,
    pub state: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_files: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_source_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_dest_path: Option<PathBuf>,
}

impl StateEntry {
    /// Entry with no progress information.
    pub fn new(job_name: impl Into<String>, state: JobStatus) -> Self {
        Self {
            job_name: job_name.into(),
            last_action_time: Utc::now(),
            state,
            total_files: None,
            total_bytes: None,
            progress_percent: None,
            remaining_files: None,
            remaining_bytes: None,
            current_source_path: None,
            current_dest_path: None,
        }
    }

    pub fn inactive(job_name: impl Into<String>) -> Self {
        Self::new(job_name, JobStatus::Inactive)
    }

    pub fn active(job_name: impl Into<String>) -> Self {
        Self::new(job_name, JobStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_entry_omits_progress() {
        let json = serde_json::to_value(StateEntry::inactive("nightly")).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj["job_name"], "nightly");
        assert_eq!(obj["state"], "inactive");
        assert!(obj.contains_key("last_action_time"));
        assert!(!obj.contains_key("progress_percent"));
        assert!(!obj.contains_key("current_source_path"));
    }

    #[test]
    fn test_entry_round_trip_with_progress() {
        let mut entry = StateEntry::active("nightly");
        entry.total_files = Some(10);
        entry.remaining_files = Some(4);
        entry.progress_percent = Some(60.0);
        entry.current_source_path = Some(PathBuf::from("/src/a.txt"));

        let json = serde_json::to_string(&entry).unwrap();
        let back: StateEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
