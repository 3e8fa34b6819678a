//! Append-only JSONL audit log.
//!
//! Every pipeline transition lands here as one self-delimited line, written
//! in a single call so a reader never observes a torn record. The log owns
//! its entries: nothing is rewritten or deleted, and every string in a
//! payload passes through the sanitizer before it reaches disk. Structural
//! fields (stage, ids, correlation) pass through untouched.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use steward_core::{ids, Sanitizer, SCHEMA_VERSION};
use thiserror::Error;

/// Errors emitted by the audit log. An audit-write failure is fatal for the
/// pipeline step that triggered it; callers must not report success past it.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Pipeline stage an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    Propose,
    Explain,
    Decision,
    Execute,
    Receipt,
    Learn,
    LawDecision,
    ExecutionAttempt,
}

impl AuditStage {
    /// Wire label of this stage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Propose => "propose",
            Self::Explain => "explain",
            Self::Decision => "decision",
            Self::Execute => "execute",
            Self::Receipt => "receipt",
            Self::Learn => "learn",
            Self::LawDecision => "law_decision",
            Self::ExecutionAttempt => "execution_attempt",
        }
    }
}

/// Correlation ids tying one event to its proposal, request and (from the
/// decision stage onward) decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    pub request_id: String,
    pub proposal_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub schema_version: String,
    pub event_id: String,
    pub timestamp: String,
    /// Emitting service instance.
    pub service: String,
    pub event_type: AuditStage,
    pub correlation: Correlation,
    pub payload: Value,
}

impl AuditEvent {
    /// Build an event with a fresh id and timestamp.
    pub fn new(
        service: impl Into<String>,
        event_type: AuditStage,
        correlation: Correlation,
        payload: Value,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            event_id: ids::new_event_id(),
            timestamp: ids::now_iso(),
            service: service.into(),
            event_type,
            correlation,
            payload,
        }
    }
}

/// Append-only JSONL audit log, single writer.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    sanitizer: Sanitizer,
}

impl AuditLog {
    /// Bind a log to `path`. No I/O happens until the first append, which
    /// also creates the parent directory if needed.
    pub fn open<P: AsRef<Path>>(path: P, sanitizer: Sanitizer) -> Self {
        Self { path: path.as_ref().to_path_buf(), sanitizer }
    }

    /// Path this log writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single line. The payload is sanitized before
    /// serialization; the write is one call followed by a flush.
    pub fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut record = event.clone();
        self.sanitizer.sanitize_value(&mut record.payload);
        let line = serde_json::to_string(&record)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut buf = line.into_bytes();
        buf.push(b'\n');
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    /// All entries in write order. A missing file reads as empty.
    pub fn entries(&self) -> Result<Vec<AuditEvent>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }
}
