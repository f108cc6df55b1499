//! Persisted job list (`jobs.json`).

use std::path::PathBuf;
use tokio::sync::RwLock;

use super::{BackupJob, JobId};
use crate::fs::atomic;
use crate::{EngineError, Result};

/// Jobs in creation order, rewritten to disk on every change.
pub struct JobStore {
    path: PathBuf,
    jobs: RwLock<Vec<BackupJob>>,
}

impl JobStore {
    /// Open the store, loading any previously persisted jobs.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let jobs: Vec<BackupJob> = atomic::read_json(&path).await?.unwrap_or_default();
        Ok(Self {
            path,
            jobs: RwLock::new(jobs),
        })
    }

    /// Append a job. Names are unique.
    pub async fn insert(&self, job: BackupJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.name == job.name) {
            return Err(EngineError::DuplicateJob(job.name));
        }
        jobs.push(job);
        atomic::write_json(&self.path, &*jobs).await
    }

    pub async fn remove(&self, id: JobId) -> Result<BackupJob> {
        let mut jobs = self.jobs.write().await;
        let pos = jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
        let removed = jobs.remove(pos);
        atomic::write_json(&self.path, &*jobs).await?;
        Ok(removed)
    }

    pub async fn get(&self, id: JobId) -> Option<BackupJob> {
        self.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    pub async fn find_by_name(&self, name: &str) -> Option<BackupJob> {
        self.jobs.read().await.iter().find(|j| j.name == name).cloned()
    }

    pub async fn list(&self) -> Vec<BackupJob> {
        self.jobs.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::BackupType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_insert_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.json");

        let store = JobStore::open(&path).await.unwrap();
        let first = BackupJob::new("a", BackupType::Full, "/src/a", "/dst/a");
        let second = BackupJob::new("b", BackupType::Differential, "/src/b", "/dst/b");
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();

        let reopened = JobStore::open(&path).await.unwrap();
        assert_eq!(reopened.list().await, vec![first, second]);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).await.unwrap();

        store.insert(BackupJob::new("a", BackupType::Full, "/s", "/d")).await.unwrap();
        let err = store
            .insert(BackupJob::new("a", BackupType::Differential, "/s2", "/d2"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::DuplicateJob(name) if name == "a"));
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).await.unwrap();

        let a = BackupJob::new("a", BackupType::Full, "/s", "/d");
        let b = BackupJob::new("b", BackupType::Full, "/s", "/d");
        store.insert(a.clone()).await.unwrap();
        store.insert(b.clone()).await.unwrap();

        let removed = store.remove(a.id).await.unwrap();
        assert_eq!(removed.name, "a");
        assert_eq!(store.list().await, vec![b.clone()]);
        assert_eq!(store.find_by_name("b").await, Some(b));

        assert!(matches!(store.remove(a.id).await, Err(EngineError::JobNotFound(_))));
    }
}
