//! Durable job state store.
//!
//! Holds exactly one [`StateEntry`] per job name in insertion order. Every
//! change rewrites the whole state file so external observers always read a
//! complete current picture. Subscribers are notified through a broadcast
//! channel after the write lock has been released.

use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::StateEntry;
use crate::fs::atomic;
use crate::Result;

/// Maximum number of queued notifications per subscriber
const BROADCAST_CAPACITY: usize = 1000;

pub struct StateTracker {
    path: PathBuf,
    entries: Mutex<Vec<StateEntry>>,
    notify_tx: broadcast::Sender<StateEntry>,
}

impl StateTracker {
    /// Open the tracker, reloading a previously persisted state file.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries: Vec<StateEntry> = atomic::read_json(&path).await?.unwrap_or_default();
        let (notify_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            notify_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receive every entry written after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEntry> {
        self.notify_tx.subscribe()
    }

    /// Replace the entry for `entry.job_name` (or append it) and persist the
    /// full snapshot.
    pub async fn update_job_state(&self, entry: StateEntry) -> Result<()> {
        {
            let mut entries = self.entries.lock().await;
            match entries.iter_mut().find(|e| e.job_name == entry.job_name) {
                Some(existing) => *existing = entry.clone(),
                None => entries.push(entry.clone()),
            }
            atomic::write_json(&self.path, &*entries).await?;
        }

        // No receivers is not an error
        let _ = self.notify_tx.send(entry);
        Ok(())
    }

    /// Drop the entry for `job_name`. Returns whether one existed.
    pub async fn remove_job_state(&self, job_name: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.job_name != job_name);
        if entries.len() == before {
            return Ok(false);
        }
        atomic::write_json(&self.path, &*entries).await?;
        debug!("Removed state entry for job {}", job_name);
        Ok(true)
    }

    pub async fn get(&self, job_name: &str) -> Option<StateEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.job_name == job_name)
            .cloned()
    }

    /// All entries in insertion order.
    pub async fn snapshot(&self) -> Vec<StateEntry> {
        self.entries.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobStatus;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn read_file(path: &Path) -> Vec<StateEntry> {
        let bytes = tokio::fs::read(path).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_update_overwrites_by_name() {
        let dir = TempDir::new().unwrap();
        let tracker = StateTracker::open(dir.path().join("state.json")).await.unwrap();

        tracker.update_job_state(StateEntry::inactive("a")).await.unwrap();
        tracker.update_job_state(StateEntry::inactive("b")).await.unwrap();
        tracker.update_job_state(StateEntry::active("a")).await.unwrap();

        let on_disk = read_file(tracker.path()).await;
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[0].job_name, "a");
        assert_eq!(on_disk[0].state, JobStatus::Active);
        assert_eq!(on_disk[1].job_name, "b");
        assert_eq!(on_disk, tracker.snapshot().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_for_distinct_jobs() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(StateTracker::open(dir.path().join("state.json")).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                let name = format!("job-{}", i);
                for step in 0..5usize {
                    let mut entry = StateEntry::active(name.clone());
                    entry.remaining_files = Some(4 - step);
                    tracker.update_job_state(entry).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let on_disk = read_file(tracker.path()).await;
        assert_eq!(on_disk.len(), 16);
        for i in 0..16 {
            let name = format!("job-{}", i);
            let entry = on_disk.iter().find(|e| e.job_name == name).unwrap();
            assert_eq!(entry.remaining_files, Some(0));
        }
    }

    #[tokio::test]
    async fn test_remove_job_state() {
        let dir = TempDir::new().unwrap();
        let tracker = StateTracker::open(dir.path().join("state.json")).await.unwrap();

        tracker.update_job_state(StateEntry::inactive("a")).await.unwrap();
        tracker.update_job_state(StateEntry::inactive("b")).await.unwrap();

        assert!(tracker.remove_job_state("a").await.unwrap());
        assert!(!tracker.remove_job_state("a").await.unwrap());

        let on_disk = read_file(tracker.path()).await;
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].job_name, "b");
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let dir = TempDir::new().unwrap();
        let tracker = StateTracker::open(dir.path().join("state.json")).await.unwrap();
        let mut rx = tracker.subscribe();

        tracker.update_job_state(StateEntry::active("a")).await.unwrap();

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.job_name, "a");
        assert_eq!(seen.state, JobStatus::Active);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        {
            let tracker = StateTracker::open(&path).await.unwrap();
            tracker.update_job_state(StateEntry::inactive("a")).await.unwrap();
        }

        let reopened = StateTracker::open(&path).await.unwrap();
        assert_eq!(reopened.get("a").await.map(|e| e.state), Some(JobStatus::Inactive));
    }
}
