//! Backup orchestrator.
//!
//! Owns the job list, the state tracker and the encryption queue, and drives
//! job launches: Active while running, Inactive afterwards (also after a
//! failure, which is reported through a `JobFailed` event and the returned
//! error).
//!
//! Launches that share a destination root are serialized, since both
//! strategies rewrite `hash.json` there. Launches beyond
//! `engine.max_concurrent_jobs` wait for a free slot; a launch only takes a
//! slot once it holds its destination lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::crypto::helper::code_to_result;
use crate::crypto::{CryptoOperation, EncryptionQueue, ExternalHelper};
use crate::events::{emit, EventKind, EventRecord, EventSink, TracingSink};
use crate::executor::{BackupExecutor, BackupReport};
use crate::jobs::{BackupJob, BackupType, JobId, JobStore};
use crate::state::{StateEntry, StateTracker};
use crate::{EngineError, Result};

pub struct BackupOrchestrator {
    jobs: JobStore,
    state: Arc<StateTracker>,
    queue: EncryptionQueue,
    events: Arc<dyn EventSink>,
    executor: BackupExecutor,
    dest_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    job_slots: Option<Arc<Semaphore>>,
}

impl BackupOrchestrator {
    /// Open with events forwarded to `tracing`.
    pub async fn open(config: Config) -> Result<Self> {
        Self::with_events(config, Arc::new(TracingSink)).await
    }

    /// Open with a custom event sink.
    pub async fn with_events(config: Config, events: Arc<dyn EventSink>) -> Result<Self> {
        let jobs = JobStore::open(config.jobs_file()).await?;
        let state = Arc::new(StateTracker::open(config.state_file()).await?);
        let queue = EncryptionQueue::new(
            ExternalHelper::from_config(&config.encryption),
            config.encryption.cooldown(),
            Arc::clone(&events),
        );
        let executor = BackupExecutor::new(&config, Arc::clone(&state), queue.clone(), Arc::clone(&events));
        let job_slots = match config.engine.max_concurrent_jobs {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        info!(
            "Backup orchestrator ready: {} jobs, data dir {}",
            jobs.list().await.len(),
            config.engine.data_dir.display()
        );

        Ok(Self {
            jobs,
            state,
            queue,
            events,
            executor,
            dest_locks: Mutex::new(HashMap::new()),
            job_slots,
        })
    }

    /// Register a job and mark it Inactive.
    pub async fn create_job(
        &self,
        name: &str,
        backup_type: BackupType,
        source_root: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
    ) -> Result<BackupJob> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation("job name must not be empty".into()));
        }

        let job = BackupJob::new(name, backup_type, source_root, dest_root);
        self.jobs.insert(job.clone()).await?;
        self.state.update_job_state(StateEntry::inactive(&job.name)).await?;

        emit(
            self.events.as_ref(),
            EventRecord::new(EventKind::JobCreated)
                .field("job", job.name.clone())
                .field("id", job.id.to_string())
                .field("type", job.backup_type.as_str())
                .field("source", job.source_root.display().to_string())
                .field("dest", job.dest_root.display().to_string()),
        );

        Ok(job)
    }

    /// Delete a job and its state entry.
    pub async fn remove_job(&self, id: JobId) -> Result<BackupJob> {
        let job = self.jobs.remove(id).await?;
        self.state.remove_job_state(&job.name).await?;

        emit(
            self.events.as_ref(),
            EventRecord::new(EventKind::JobRemoved)
                .field("job", job.name.clone())
                .field("id", job.id.to_string()),
        );

        Ok(job)
    }

    /// Jobs in creation order.
    pub async fn jobs(&self) -> Vec<BackupJob> {
        self.jobs.list().await
    }

    pub async fn find_job(&self, name: &str) -> Option<BackupJob> {
        self.jobs.find_by_name(name).await
    }

    /// Run a job to completion.
    pub async fn launch_job(&self, id: JobId, password: &str) -> Result<BackupReport> {
        let job = self
            .jobs
            .get(id)
            .await
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;

        let dest_lock = self.dest_lock(&job.dest_root).await;
        let result = async {
            let _dest_guard = dest_lock.lock().await;
            let _slot = self.acquire_slot().await?;
            self.run_job(&job, password).await
        }
        .await;
        self.release_dest_lock(&job.dest_root, dest_lock).await;

        result
    }

    async fn run_job(&self, job: &BackupJob, password: &str) -> Result<BackupReport> {
        self.state.update_job_state(StateEntry::active(&job.name)).await?;
        emit(
            self.events.as_ref(),
            EventRecord::new(EventKind::JobStarted)
                .field("job", job.name.clone())
                .field("type", job.backup_type.as_str())
                .field("source", job.source_root.display().to_string())
                .field("dest", job.dest_root.display().to_string()),
        );

        let result = self.executor.execute(job, password).await;

        if let Err(e) = self.state.update_job_state(StateEntry::inactive(&job.name)).await {
            warn!("Failed to mark job {} inactive: {}", job.name, e);
        }

        match result {
            Ok(report) => {
                info!(
                    "Job {} finished: {} transferred, {} failed, {} ms",
                    job.name, report.transferred_files, report.failed_files, report.duration_ms
                );
                emit(
                    self.events.as_ref(),
                    EventRecord::new(EventKind::JobCompleted)
                        .field("job", job.name.clone())
                        .field("type", report.backup_type.as_str())
                        .field("transferred", report.transferred_files)
                        .field("failed", report.failed_files)
                        .field("duration_ms", report.duration_ms),
                );
                Ok(report)
            }
            Err(e) => {
                error!("Job {} failed: {}", job.name, e);
                emit(
                    self.events.as_ref(),
                    EventRecord::new(EventKind::JobFailed)
                        .field("job", job.name.clone())
                        .field("error", e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Decrypt one file into `target_dir` through the shared helper queue.
    pub async fn restore_encrypted(
        &self,
        file: impl Into<PathBuf>,
        password: &str,
        target_dir: impl Into<PathBuf>,
    ) -> Result<Duration> {
        let code = self
            .queue
            .enqueue(CryptoOperation::Decrypt, file, password, target_dir)
            .await;
        code_to_result(code)
    }

    pub fn state(&self) -> &Arc<StateTracker> {
        &self.state
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEntry> {
        self.state.subscribe()
    }

    async fn acquire_slot(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.job_slots {
            Some(slots) => Arc::clone(slots)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|e| EngineError::Configuration(format!("job slots closed: {}", e))),
            None => Ok(None),
        }
    }

    async fn dest_lock(&self, dest_root: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.dest_locks.lock().await;
        locks
            .entry(dest_root.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other launch holds or waits on it.
    async fn release_dest_lock(&self, dest_root: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.dest_locks.lock().await;
        drop(lock);
        if locks.get(dest_root).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(dest_root);
        }
    }
}
