//! Append-only artifact event log.
//!
//! Every job outcome lands here as one immutable [`ArtifactEvent`] per
//! declared output. The log is the system of record: manifests are folded
//! from it (last event per artifact wins), never edited in place, so any
//! revision's view of the world can be reconstructed by replaying the file.
//!
//! Two implementations: [`FsEventLog`] persists newline-delimited JSON under
//! the project's `events/` directory, [`MemoryEventLog`] backs tests and
//! dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::store::BlobRef;
use crate::types::{JobId, NodeId, Revision};
use crate::value::Value;

/// Terminal outcome recorded for an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Succeeded,
    Failed,
}

/// Failure detail attached to a `failed` event.
///
/// `recoverable: true` promises the provider can be re-queried for the
/// result without re-submitting the work; `provider_request_id` is the
/// handle that re-query needs. A recoverable failure without a request id
/// is malformed and the planner will treat the job as plainly failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub message: String,
    #[serde(default)]
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Diagnostics {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
            provider_request_id: None,
            details: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message)
    }

    #[must_use]
    pub fn recoverable(mut self, provider_request_id: impl Into<String>) -> Self {
        self.recoverable = true;
        self.provider_request_id = Some(provider_request_id.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// One append-only fact about an artifact's outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactEvent {
    pub artifact_id: NodeId,
    pub revision: Revision,
    pub inputs_hash: String,
    /// Stored bytes for succeeded events; absent on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<BlobRef>,
    pub status: ArtifactStatus,
    pub produced_by: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactEvent {
    pub fn succeeded(
        artifact_id: NodeId,
        revision: Revision,
        inputs_hash: impl Into<String>,
        output: BlobRef,
        produced_by: JobId,
    ) -> Self {
        Self {
            artifact_id,
            revision,
            inputs_hash: inputs_hash.into(),
            output: Some(output),
            status: ArtifactStatus::Succeeded,
            produced_by,
            diagnostics: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(
        artifact_id: NodeId,
        revision: Revision,
        inputs_hash: impl Into<String>,
        produced_by: JobId,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            artifact_id,
            revision,
            inputs_hash: inputs_hash.into(),
            output: None,
            status: ArtifactStatus::Failed,
            produced_by,
            diagnostics: Some(diagnostics),
            created_at: Utc::now(),
        }
    }
}

/// Event log persistence failures.
#[derive(Debug, Error, Diagnostic)]
pub enum EventLogError {
    #[error("event log I/O failure at {path:?}")]
    #[diagnostic(
        code(planloom::events::io),
        help("check the project storage directory exists and is writable")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode event for {artifact}")]
    #[diagnostic(code(planloom::events::encode))]
    Encode {
        artifact: NodeId,
        #[source]
        source: serde_json::Error,
    },
}

/// Where artifact events are appended and replayed from.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one event. Order of appends is the fold order.
    async fn append(&self, event: &ArtifactEvent) -> Result<(), EventLogError>;

    /// Replays every event in append order.
    async fn read_all(&self) -> Result<Vec<ArtifactEvent>, EventLogError>;
}

/// Newline-delimited JSON log on disk.
///
/// Reads are tolerant: a line that does not parse (a crash can truncate the
/// final append) is logged and skipped, which at worst re-marks the affected
/// artifact dirty at the next plan.
#[derive(Clone, Debug)]
pub struct FsEventLog {
    path: PathBuf,
}

impl FsEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> EventLogError {
        EventLogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl EventLog for FsEventLog {
    async fn append(&self, event: &ArtifactEvent) -> Result<(), EventLogError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let mut line = serde_json::to_string(event).map_err(|e| EventLogError::Encode {
            artifact: event.artifact_id.clone(),
            source: e,
        })?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<ArtifactEvent>, EventLogError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut events = Vec::new();
        for (number, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ArtifactEvent>(line) {
                Ok(event) => events.push(event),
                Err(error) => {
                    warn!(
                        path = %self.path.display(),
                        line = number + 1,
                        %error,
                        "skipping unreadable event log line"
                    );
                }
            }
        }
        Ok(events)
    }
}

/// In-memory log for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<ArtifactEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds the log, for setting up planner scenarios.
    pub fn with_events(events: Vec<ArtifactEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    pub fn snapshot(&self) -> Vec<ArtifactEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: &ArtifactEvent) -> Result<(), EventLogError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<ArtifactEvent>, EventLogError> {
        Ok(self.events.lock().clone())
    }
}
