//! Append-only access logging.
//!
//! Records every authenticated operation, allowed or denied. Records carry
//! the operation, the resolved role, the secret identifier and the outcome.
//! They never carry payloads or tokens.
//!
//! Supports pluggable sinks for forwarding records to files or elsewhere.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credentials::Role;
use crate::policy::Operation;
use crate::store::FILE_MODE;

/// Records kept in memory before the oldest is dropped.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A sink that receives access records. Implement this to forward records
/// to a file, syslog, or other persistent store.
pub trait AccessSink: Send {
    /// Append a record. Called for every logged operation.
    fn append(&mut self, record: &AccessRecord);
}

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allowed,
    Unauthorized,
    Locked,
    NotFound,
    ConfirmationRequired,
    Failed,
}

/// A permanent record of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    /// The resolved role. `None` when the credential did not verify.
    pub role: Option<Role>,
    /// The secret or device identifier the operation addressed, if any.
    pub subject: Option<String>,
    pub outcome: Outcome,
}

impl AccessRecord {
    pub fn new(
        operation: Operation,
        role: Option<Role>,
        subject: Option<&str>,
        outcome: Outcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            role,
            subject: subject.map(str::to_string),
            outcome,
        }
    }
}

/// A bounded in-memory log of recent records that forwards every record to
/// any attached sinks.
pub struct AccessLog {
    records: VecDeque<AccessRecord>,
    capacity: usize,
    forward_sinks: Vec<Box<dyn AccessSink>>,
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog")
            .field("records", &self.records.len())
            .field("capacity", &self.capacity)
            .field("forward_sinks", &self.forward_sinks.len())
            .finish()
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
            forward_sinks: Vec::new(),
        }
    }

    /// Add a sink to receive every record.
    pub fn add_forward_sink(&mut self, sink: Box<dyn AccessSink>) {
        self.forward_sinks.push(sink);
    }

    /// Append a new record to the log and forward to any attached sinks.
    pub fn append(&mut self, record: AccessRecord) {
        for sink in self.forward_sinks.iter_mut() {
            sink.append(&record);
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Return the number of records held in memory.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AccessRecord> {
        self.records.iter()
    }
}

// ---------------------------------------------------------------------------
// Built-in sink: file
// ---------------------------------------------------------------------------

/// Writes access records as JSON lines (one per record) to an owner-only
/// file. Creates the file if it doesn't exist; appends if it does.
pub struct FileAccessSink {
    file: std::fs::File,
}

impl FileAccessSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(FILE_MODE)
            .open(path)?;
        Ok(Self { file })
    }
}

impl AccessSink for FileAccessSink {
    fn append(&mut self, record: &AccessRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(self.file, "{line}").and_then(|_| self.file.flush()) {
                    tracing::warn!(error = %e, "failed to write access log");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode access record"),
        }
    }
}
