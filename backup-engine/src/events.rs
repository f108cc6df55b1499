//! Structured event log.
//!
//! The engine reports what it does as named events with a bag of fields.
//! Rendering those records (JSON lines, XML, a remote collector) belongs to
//! whatever [`EventSink`] the host plugs in; [`TracingSink`] forwards them to
//! the process logger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::Result;

/// Event kinds emitted by the orchestrator, executor and encryption queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    JobCreated,
    JobRemoved,
    JobStarted,
    JobCompleted,
    JobFailed,
    FileCopied,
    FileCopyError,
    FileEncrypted,
    FileEncryptError,
    FileHashError,
    FullBackupCompleted,
    DifferentialBackupCompleted,
    DifferentialFallback,
    HashFileCreated,
    HashFileLoaded,
    EncryptionTaskQueued,
    EncryptionTaskCompleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub fields: Map<String, Value>,
}

impl EventRecord {
    pub fn new(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Destination for structured events.
pub trait EventSink: Send + Sync {
    fn write(&self, record: &EventRecord) -> Result<()>;
}

/// Forwards events to `tracing`; failure kinds are logged at warn level.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn write(&self, record: &EventRecord) -> Result<()> {
        let fields = Value::Object(record.fields.clone());
        match record.kind {
            EventKind::JobFailed
            | EventKind::FileCopyError
            | EventKind::FileEncryptError
            | EventKind::FileHashError => {
                tracing::warn!(event = %record.kind, at = %record.timestamp.to_rfc3339(), %fields);
            }
            _ => {
                tracing::info!(event = %record.kind, at = %record.timestamp.to_rfc3339(), %fields);
            }
        }
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<EventRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn write(&self, record: &EventRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| crate::EngineError::Configuration("event buffer poisoned".into()))?;
        records.push(record.clone());
        Ok(())
    }
}

/// Write through a shared sink; sink failures are logged and otherwise ignored.
pub(crate) fn emit(sink: &dyn EventSink, record: EventRecord) {
    if let Err(e) = sink.write(&record) {
        tracing::warn!("Failed to write {} event: {}", record.kind, e);
    }
}
