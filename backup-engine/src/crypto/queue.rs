//! FIFO serializer in front of the encryption helper.
//!
//! The helper can only run one instance at a time while many backup jobs may
//! need it at once. Producers push a task and wait on its one-shot result; a
//! single lazily started worker drains the queue in submission order, runs
//! exactly one invocation at a time, pauses for a cooldown between
//! invocations, and goes idle when the queue is empty.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, warn};

use super::helper::{ExternalHelper, TIMED_OUT, UNEXPECTED_FAILURE};
use super::CryptoOperation;
use crate::events::{emit, EventKind, EventRecord, EventSink};

/// How long a producer waits for its task before giving up with `TIMED_OUT`.
/// The helper process itself is not stopped by this watchdog.
pub const QUEUE_WATCHDOG: Duration = Duration::from_secs(5 * 60);

struct EncryptionTask {
    operation: CryptoOperation,
    source_file: PathBuf,
    password: String,
    target_dir: PathBuf,
    result_tx: oneshot::Sender<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Running,
}

struct QueueInner {
    tasks: VecDeque<EncryptionTask>,
    worker: WorkerState,
}

struct Shared {
    helper: ExternalHelper,
    cooldown: Duration,
    watchdog: Duration,
    events: Arc<dyn EventSink>,
    inner: Mutex<QueueInner>,
    #[cfg(test)]
    panic_before_invoke: std::sync::atomic::AtomicBool,
}

impl Shared {
    /// Test hook: make the worker panic in place of its next helper call.
    #[cfg(test)]
    fn before_invoke(&self) {
        if self.panic_before_invoke.swap(false, std::sync::atomic::Ordering::SeqCst) {
            panic!("encryption worker failed before invoking the helper");
        }
    }

    #[cfg(not(test))]
    fn before_invoke(&self) {}
}

#[derive(Clone)]
pub struct EncryptionQueue {
    shared: Arc<Shared>,
}

impl EncryptionQueue {
    pub fn new(helper: ExternalHelper, cooldown: Duration, events: Arc<dyn EventSink>) -> Self {
        Self::with_watchdog(helper, cooldown, QUEUE_WATCHDOG, events)
    }

    /// Queue with a custom producer watchdog.
    pub fn with_watchdog(
        helper: ExternalHelper,
        cooldown: Duration,
        watchdog: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                helper,
                cooldown,
                watchdog,
                events,
                inner: Mutex::new(QueueInner {
                    tasks: VecDeque::new(),
                    worker: WorkerState::Idle,
                }),
                #[cfg(test)]
                panic_before_invoke: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Submit one helper invocation and wait for its result.
    ///
    /// Returns the elapsed milliseconds of a successful call, or a negative
    /// code: -1 executable not found, -2 spawn failure, -3 timeout (process
    /// timeout or producer watchdog), -N exit code N, -999 unexpected failure.
    pub async fn enqueue(
        &self,
        operation: CryptoOperation,
        source_file: impl Into<PathBuf>,
        password: impl Into<String>,
        target_dir: impl Into<PathBuf>,
    ) -> i64 {
        let (result_tx, result_rx) = oneshot::channel();
        let task = EncryptionTask {
            operation,
            source_file: source_file.into(),
            password: password.into(),
            target_dir: target_dir.into(),
            result_tx,
        };
        let source_display = task.source_file.display().to_string();

        let (start_worker, position) = {
            let mut inner = self.shared.inner.lock().await;
            inner.tasks.push_back(task);
            let start = inner.worker == WorkerState::Idle;
            if start {
                inner.worker = WorkerState::Running;
            }
            (start, inner.tasks.len())
        };

        emit(
            self.shared.events.as_ref(),
            EventRecord::new(EventKind::EncryptionTaskQueued)
                .field("operation", operation.to_string())
                .field("source", source_display.clone())
                .field("position", position),
        );

        if start_worker {
            self.spawn_worker();
        }

        match tokio::time::timeout(self.shared.watchdog, result_rx).await {
            Ok(Ok(code)) => code,
            Ok(Err(_)) => UNEXPECTED_FAILURE,
            Err(_) => {
                warn!(
                    "Gave up waiting for {} of {} after {:?}",
                    operation, source_display, self.shared.watchdog
                );
                TIMED_OUT
            }
        }
    }

    /// Number of tasks not yet picked up by the worker.
    pub async fn pending(&self) -> usize {
        self.shared.inner.lock().await.tasks.len()
    }

    pub async fn is_running(&self) -> bool {
        self.shared.inner.lock().await.worker == WorkerState::Running
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let run = tokio::spawn(drain_queue(Arc::clone(&shared))).await;
            if let Err(e) = run {
                error!("Encryption worker stopped unexpectedly: {}", e);
                let orphaned: Vec<EncryptionTask> = {
                    let mut inner = shared.inner.lock().await;
                    inner.worker = WorkerState::Idle;
                    inner.tasks.drain(..).collect()
                };
                for task in orphaned {
                    let _ = task.result_tx.send(UNEXPECTED_FAILURE);
                }
            }
        });
    }
}

async fn drain_queue(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut inner = shared.inner.lock().await;
            match inner.tasks.pop_front() {
                Some(task) => task,
                None => {
                    inner.worker = WorkerState::Idle;
                    debug!("Encryption queue drained, worker idle");
                    return;
                }
            }
        };

        if task.result_tx.is_closed() {
            debug!(
                "Skipping {} of {}: producer stopped waiting",
                task.operation,
                task.source_file.display()
            );
            continue;
        }

        shared.before_invoke();

        let code = match shared
            .helper
            .invoke(task.operation, &task.source_file, &task.password, &task.target_dir)
            .await
        {
            Ok(elapsed) => elapsed.as_millis() as i64,
            Err(e) => {
                warn!("{} of {} failed: {}", task.operation, task.source_file.display(), e);
                e.code()
            }
        };

        emit(
            shared.events.as_ref(),
            EventRecord::new(EventKind::EncryptionTaskCompleted)
                .field("operation", task.operation.to_string())
                .field("source", task.source_file.display().to_string())
                .field("result", code),
        );

        let _ = task.result_tx.send(code);

        tokio::time::sleep(shared.cooldown).await;
    }
}
