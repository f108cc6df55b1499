//! Backup job executor - runs one job's full or differential strategy.
//!
//! This module ties together:
//! - Source traversal
//! - Change detection against the stored hash index
//! - Plain copies and delegated encryption
//! - Progress publication through the state tracker

pub mod change;
pub mod hash_index;
pub mod progress;

use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::Config;
use crate::crypto::{CryptoOperation, EncryptionQueue};
use crate::events::{emit, EventKind, EventRecord, EventSink};
use crate::fs::walker::{walk_directory, FileInfo, WalkOptions};
use crate::jobs::{BackupJob, BackupType};
use crate::state::{StateEntry, StateTracker};
use crate::{EngineError, Result};
use change::{detect_changes, digest_file};
use hash_index::HashIndex;
use progress::{format_bytes, ProgressTracker};

/// Backup execution result
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    /// Strategy actually executed (a bootstrapped differential reports `full`)
    pub backup_type: BackupType,
    /// `FULL_<ts>` / `DIFF_<ts>` folder, absent when nothing was selected
    pub run_dir: Option<PathBuf>,
    pub total_files: usize,
    pub total_bytes: u64,
    pub selected_files: usize,
    pub selected_bytes: u64,
    pub transferred_files: usize,
    pub failed_files: usize,
    pub unchanged_files: usize,
    pub unchanged_bytes: u64,
    pub deleted_files: usize,
    pub duration_ms: u64,
}

/// Runs backups; one instance is shared by every job of an orchestrator.
pub struct BackupExecutor {
    state: Arc<StateTracker>,
    queue: EncryptionQueue,
    events: Arc<dyn EventSink>,
    encrypt_extensions: HashSet<String>,
    walk_options: WalkOptions,
    write_hash_index_on_full: bool,
}

impl BackupExecutor {
    pub fn new(
        config: &Config,
        state: Arc<StateTracker>,
        queue: EncryptionQueue,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state,
            queue,
            events,
            encrypt_extensions: config.encryption.extensions(),
            walk_options: WalkOptions {
                exclude_patterns: config.backup.exclude_patterns.clone(),
                ..Default::default()
            },
            write_hash_index_on_full: config.backup.write_hash_index_on_full,
        }
    }

    /// Execute the job's strategy.
    pub async fn execute(&self, job: &BackupJob, password: &str) -> Result<BackupReport> {
        match job.backup_type {
            BackupType::Full => self.run_full(job, password, self.write_hash_index_on_full).await,
            BackupType::Differential => self.run_differential(job, password).await,
        }
    }

    async fn run_full(&self, job: &BackupJob, password: &str, build_index: bool) -> Result<BackupReport> {
        let started = Instant::now();
        validate_source(&job.source_root)?;

        let files = self.scan(&job.source_root).await?;
        let total_bytes: u64 = files.iter().map(|f| f.size).sum();
        info!(
            "Full backup of {}: {} files, {}",
            job.name,
            files.len(),
            format_bytes(total_bytes)
        );

        let run_dir = create_run_dir(&job.dest_root, BackupType::Full).await?;
        let mut progress = ProgressTracker::new(&job.name, files.len(), total_bytes);
        self.publish(progress.entry(None, None)).await;

        let mut index = HashIndex::default();
        let mut transferred = 0usize;
        let mut failed = 0usize;

        for file in &files {
            let dest_path = run_dir.join(&file.relative_path);

            if build_index {
                match digest_file(file.path.clone()).await {
                    Ok(digest) => index.insert(file.relative_key(), digest),
                    Err(e) => self.hash_error(job, file, &e.to_string()),
                }
            }

            if self.transfer_file(job, file, &dest_path, password).await {
                transferred += 1;
            } else {
                failed += 1;
            }

            progress.record(file.size);
            self.publish(progress.entry(Some(&file.path), Some(&dest_path))).await;
        }

        if build_index {
            index.save(&job.dest_root).await?;
            self.emit(
                EventRecord::new(EventKind::HashFileCreated)
                    .field("job", job.name.clone())
                    .field("path", HashIndex::path_for(&job.dest_root).display().to_string())
                    .field("entries", index.len()),
            );
        }

        let report = BackupReport {
            backup_type: BackupType::Full,
            run_dir: Some(run_dir),
            total_files: files.len(),
            total_bytes,
            selected_files: files.len(),
            selected_bytes: total_bytes,
            transferred_files: transferred,
            failed_files: failed,
            unchanged_files: 0,
            unchanged_bytes: 0,
            deleted_files: 0,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.emit(
            EventRecord::new(EventKind::FullBackupCompleted)
                .field("job", job.name.clone())
                .field("files", report.total_files)
                .field("bytes", report.total_bytes)
                .field("transferred", report.transferred_files)
                .field("failed", report.failed_files)
                .field("duration_ms", report.duration_ms),
        );

        Ok(report)
    }

    async fn run_differential(&self, job: &BackupJob, password: &str) -> Result<BackupReport> {
        let started = Instant::now();
        validate_source(&job.source_root)?;

        let baseline = match HashIndex::load(&job.dest_root).await? {
            Some(baseline) => baseline,
            None => {
                info!("No hash index for {}, running a full backup instead", job.name);
                self.emit(
                    EventRecord::new(EventKind::DifferentialFallback)
                        .field("job", job.name.clone())
                        .field("dest", job.dest_root.display().to_string()),
                );
                return self.run_full(job, password, true).await;
            }
        };

        self.emit(
            EventRecord::new(EventKind::HashFileLoaded)
                .field("job", job.name.clone())
                .field("entries", baseline.len()),
        );

        let files = self.scan(&job.source_root).await?;
        let total_files = files.len();
        let total_bytes: u64 = files.iter().map(|f| f.size).sum();

        let changes = tokio::task::spawn_blocking(move || detect_changes(files, &baseline))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))?;

        for failure in &changes.hash_failures {
            self.hash_error(job, &failure.file, &failure.error);
        }

        let selected_bytes: u64 = changes.included.iter().map(|f| f.size).sum();
        info!(
            "Differential backup of {}: {} of {} files changed ({}), {} unchanged, {} deleted",
            job.name,
            changes.included.len(),
            total_files,
            format_bytes(selected_bytes),
            changes.unchanged_files,
            changes.deleted_files
        );

        let mut progress = ProgressTracker::new(&job.name, changes.included.len(), selected_bytes);
        self.publish(progress.entry(None, None)).await;

        let run_dir = if changes.included.is_empty() {
            None
        } else {
            Some(create_run_dir(&job.dest_root, BackupType::Differential).await?)
        };

        let mut transferred = 0usize;
        let mut failed = 0usize;

        if let Some(run_dir) = &run_dir {
            for file in &changes.included {
                let dest_path = run_dir.join(&file.relative_path);

                if self.transfer_file(job, file, &dest_path, password).await {
                    transferred += 1;
                } else {
                    failed += 1;
                }

                progress.record(file.size);
                self.publish(progress.entry(Some(&file.path), Some(&dest_path))).await;
            }
        }

        // The new baseline covers every current source file, copied or not
        changes.current.save(&job.dest_root).await?;
        self.emit(
            EventRecord::new(EventKind::HashFileCreated)
                .field("job", job.name.clone())
                .field("path", HashIndex::path_for(&job.dest_root).display().to_string())
                .field("entries", changes.current.len()),
        );

        let report = BackupReport {
            backup_type: BackupType::Differential,
            run_dir,
            total_files,
            total_bytes,
            selected_files: changes.included.len(),
            selected_bytes,
            transferred_files: transferred,
            failed_files: failed + changes.hash_failures.len(),
            unchanged_files: changes.unchanged_files,
            unchanged_bytes: changes.unchanged_bytes,
            deleted_files: changes.deleted_files,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.emit(
            EventRecord::new(EventKind::DifferentialBackupCompleted)
                .field("job", job.name.clone())
                .field("files", report.total_files)
                .field("selected", report.selected_files)
                .field("transferred", report.transferred_files)
                .field("failed", report.failed_files)
                .field("unchanged", report.unchanged_files)
                .field("unchanged_bytes", report.unchanged_bytes)
                .field("deleted", report.deleted_files)
                .field("duration_ms", report.duration_ms),
        );

        Ok(report)
    }

    /// Copy one file or hand it to the encryption queue. Failures are logged
    /// and reported as `false`; they never abort the job.
    async fn transfer_file(&self, job: &BackupJob, file: &FileInfo, dest_path: &Path, password: &str) -> bool {
        let dest_dir = dest_path.parent().unwrap_or(dest_path);
        if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
            self.copy_error(job, file, dest_path, &e.to_string());
            return false;
        }

        if self.should_encrypt(file) {
            let code = self
                .queue
                .enqueue(CryptoOperation::Encrypt, file.path.clone(), password, dest_dir.to_path_buf())
                .await;

            if code >= 0 {
                self.emit(
                    EventRecord::new(EventKind::FileEncrypted)
                        .field("job", job.name.clone())
                        .field("source", file.path.display().to_string())
                        .field("dest", dest_dir.display().to_string())
                        .field("size", file.size)
                        .field("encryption_ms", code),
                );
                true
            } else {
                self.emit(
                    EventRecord::new(EventKind::FileEncryptError)
                        .field("job", job.name.clone())
                        .field("source", file.path.display().to_string())
                        .field("dest", dest_dir.display().to_string())
                        .field("code", code),
                );
                false
            }
        } else {
            let copy_started = Instant::now();
            match tokio::fs::copy(&file.path, dest_path).await {
                Ok(bytes) => {
                    self.emit(
                        EventRecord::new(EventKind::FileCopied)
                            .field("job", job.name.clone())
                            .field("source", file.path.display().to_string())
                            .field("dest", dest_path.display().to_string())
                            .field("size", bytes)
                            .field("transfer_ms", copy_started.elapsed().as_millis() as u64),
                    );
                    true
                }
                Err(e) => {
                    self.copy_error(job, file, dest_path, &e.to_string());
                    false
                }
            }
        }
    }

    fn should_encrypt(&self, file: &FileInfo) -> bool {
        file.extension()
            .map(|ext| self.encrypt_extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Scan a source root on the blocking pool
    async fn scan(&self, root: &Path) -> Result<Vec<FileInfo>> {
        let root = root.to_path_buf();
        let options = self.walk_options.clone();
        let files = tokio::task::spawn_blocking(move || walk_directory(&root, &options))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;
        Ok(files)
    }

    /// Push a progress snapshot; a failed state write does not stop the run.
    async fn publish(&self, entry: StateEntry) {
        if let Err(e) = self.state.update_job_state(entry).await {
            warn!("Failed to persist job state: {}", e);
        }
    }

    fn copy_error(&self, job: &BackupJob, file: &FileInfo, dest_path: &Path, error: &str) {
        self.emit(
            EventRecord::new(EventKind::FileCopyError)
                .field("job", job.name.clone())
                .field("source", file.path.display().to_string())
                .field("dest", dest_path.display().to_string())
                .field("error", error),
        );
    }

    fn hash_error(&self, job: &BackupJob, file: &FileInfo, error: &str) {
        self.emit(
            EventRecord::new(EventKind::FileHashError)
                .field("job", job.name.clone())
                .field("source", file.path.display().to_string())
                .field("error", error),
        );
    }

    fn emit(&self, record: EventRecord) {
        emit(self.events.as_ref(), record);
    }
}

fn validate_source(source_root: &Path) -> Result<()> {
    if source_root.is_dir() {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "source directory does not exist: {}",
            source_root.display()
        )))
    }
}

/// Create a fresh `<PREFIX>_<timestamp>` folder. Runs started within the same
/// second get a `_<n>` suffix instead of sharing a folder.
async fn create_run_dir(dest_root: &Path, backup_type: BackupType) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dest_root).await?;

    let base = format!(
        "{}_{}",
        backup_type.folder_prefix(),
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let mut run_dir = dest_root.join(&base);
    let mut attempt = 1u32;

    loop {
        match tokio::fs::create_dir(&run_dir).await {
            Ok(()) => return Ok(run_dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                run_dir = dest_root.join(format!("{}_{}", base, attempt));
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
