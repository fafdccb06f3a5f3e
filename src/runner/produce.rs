//! The provider seam and per-job result shapes.
//!
//! [`Produce`] is the only boundary the engine shares with provider
//! adapters. The runner hands each job its descriptor plus a
//! [`RunContext`] snapshot of the running manifest; the adapter returns a
//! [`ProduceOutcome`] and never touches the event log or manifest itself.
//! An adapter error becomes a plainly failed job; a recoverable provider
//! failure is reported through [`ProduceOutcome::Failed`] with
//! `recoverable: true` diagnostics so the next planning pass can re-query
//! the provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::events::Diagnostics;
use crate::jobs::JobDescriptor;
use crate::manifest::Manifest;
use crate::store::{BlobStore, StoreError};
use crate::types::{JobId, NodeId, Revision};
use crate::value::{InputValues, Value};

/// Provider invocation failure local to one job.
///
/// Returned errors are recorded as `failed` events against the job's
/// declared outputs; sibling jobs in the layer keep running.
#[derive(Debug, Error, Diagnostic)]
#[error("provider invocation failed: {message}")]
#[diagnostic(code(planloom::run::provider))]
pub struct JobError {
    pub message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<StoreError> for JobError {
    fn from(error: StoreError) -> Self {
        Self::new(error.to_string())
    }
}

/// One value produced for one declared output.
#[derive(Clone, Debug)]
pub struct ProducedArtifact {
    pub artifact_id: NodeId,
    pub value: Value,
    /// Mime type recorded for a top-level byte value. Ignored for
    /// structured values, which store as canonical JSON; buffers nested
    /// inside a structure store as octet-stream blobs.
    pub mime_type: Option<String>,
}

impl ProducedArtifact {
    pub fn new(artifact_id: NodeId, value: impl Into<Value>) -> Self {
        Self {
            artifact_id,
            value: value.into(),
            mime_type: None,
        }
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// What one invocation of a provider adapter reported.
#[derive(Clone, Debug)]
pub enum ProduceOutcome {
    /// The job completed; each artifact is persisted and recorded.
    Succeeded { artifacts: Vec<ProducedArtifact> },
    /// The job failed. With `recoverable: true` diagnostics the planner's
    /// next prepass will re-query the provider instead of re-running.
    Failed { diagnostics: Diagnostics },
    /// The adapter declined to run, e.g. an unmet gating condition.
    /// Nothing is recorded; existing artifacts stay authoritative.
    Skipped { reason: String },
}

impl ProduceOutcome {
    pub fn succeeded(artifacts: Vec<ProducedArtifact>) -> Self {
        ProduceOutcome::Succeeded { artifacts }
    }

    pub fn failed(diagnostics: Diagnostics) -> Self {
        ProduceOutcome::Failed { diagnostics }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        ProduceOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// Execution-time capabilities handed to a provider adapter.
///
/// The manifest is the running view as of the previous layer, shared by
/// every job in the current layer; upstream artifacts from earlier layers
/// resolve through it.
#[derive(Clone)]
pub struct RunContext {
    pub revision: Revision,
    pub layer_index: usize,
    pub inputs: InputValues,
    pub manifest: Arc<Manifest>,
    pub blobs: BlobStore,
    pub cancel: CancelToken,
}

impl RunContext {
    /// The bound value of an external input, if supplied.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Bytes of an upstream artifact, resolved through the running
    /// manifest. `None` when the artifact has no recorded blob.
    pub async fn artifact_bytes(&self, id: &NodeId) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(blob) = self.manifest.artifact(id).and_then(|entry| entry.blob.as_ref()) else {
            return Ok(None);
        };
        self.blobs.read(blob).await.map(Some)
    }
}

/// The sole seam to provider adapters.
#[async_trait]
pub trait Produce: Send + Sync {
    async fn produce(
        &self,
        job: &JobDescriptor,
        ctx: RunContext,
    ) -> Result<ProduceOutcome, JobError>;
}

/// Terminal state of one executed job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Overall outcome of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every executed job succeeded or was skipped, and no cancellation.
    Succeeded,
    /// At least one job failed.
    Failed,
    /// The cancel token fired; jobs never started are absent entirely.
    Cancelled,
}

/// The record of one job's execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Artifact ids actually produced and recorded. Empty unless succeeded.
    pub artifacts: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
    pub layer_index: usize,
    /// Always 1: the runner never retries. Kept for the record shape.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Everything one run produced, in job completion order per layer.
///
/// Under cancellation, jobs that never started are simply absent; callers
/// must not assume full coverage of the plan's layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub revision: Revision,
    pub status: RunStatus,
    pub jobs: Vec<JobResult>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn job(&self, id: &JobId) -> Option<&JobResult> {
        self.jobs.iter().find(|result| &result.job_id == id)
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> impl Iterator<Item = &JobResult> {
        self.jobs
            .iter()
            .filter(move |result| result.status == status)
    }
}
