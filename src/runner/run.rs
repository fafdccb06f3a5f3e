//! Layer-by-layer plan execution.
//!
//! [`PlanRunner::run`] walks an [`ExecutionPlan`] front to back. Layers
//! run strictly in sequence; jobs inside a layer run concurrently under a
//! semaphore bound. Every job outcome is recorded as events against the
//! job's outputs, appended to the log and folded into the running
//! manifest before the next layer starts, so downstream jobs resolve
//! upstream artifacts through a consistent snapshot.
//!
//! Input hashes on recorded events are recomputed against the running
//! manifest at execution time, never copied from plan time. A plan is a
//! statement of intent; only the hash of what a job actually consumed
//! keeps the next planning pass from re-running clean work.
//!
//! Cancellation is checked at exactly two points: before each layer
//! starts, and per job after its semaphore permit is acquired. A job that
//! is already executing always runs to completion and is recorded.

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::cancel::CancelToken;
use crate::events::{ArtifactEvent, Diagnostics, EventLog, EventLogError};
use crate::hashing::canonical_json;
use crate::jobs::JobDescriptor;
use crate::manifest::Manifest;
use crate::planner::ExecutionPlan;
use crate::store::{BlobRef, BlobStore, StoreError, externalize};
use crate::types::Revision;
use crate::value::{InputValues, Value};

use super::produce::{
    JobError, JobResult, JobStatus, Produce, ProduceOutcome, RunContext, RunResult, RunStatus,
};
use super::progress::{ProgressEmitter, ProgressEvent};

/// A run option combination that cannot be executed.
#[derive(Debug, Error, Diagnostic)]
pub enum PlanOptionError {
    #[error("concurrency must be at least 1, got {requested}")]
    #[diagnostic(
        code(planloom::run::invalid_concurrency),
        help("pass 1 for fully serial execution")
    )]
    InvalidConcurrency { requested: usize },

    #[error("reRunFrom layer {re_run_from} is beyond upToLayer {up_to_layer}")]
    #[diagnostic(
        code(planloom::run::empty_window),
        help("the window would execute no layers at all")
    )]
    ReRunFromBeyondUpToLayer {
        re_run_from: usize,
        up_to_layer: usize,
    },

    #[error("reRunFrom layer {re_run_from} is out of range for a {layer_count}-layer plan")]
    #[diagnostic(
        code(planloom::run::re_run_from_out_of_range),
        help("valid layers are 0 through layer_count - 1")
    )]
    ReRunFromOutOfRange {
        re_run_from: usize,
        layer_count: usize,
    },
}

/// Tuning knobs for one run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Maximum jobs in flight within a layer.
    pub concurrency: usize,
    /// Stop after this layer completes (inclusive).
    pub up_to_layer: Option<usize>,
    /// Skip layers before this one; their jobs are recorded as skipped
    /// and no events are appended for them.
    pub re_run_from: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            up_to_layer: None,
            re_run_from: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_up_to_layer(mut self, layer: usize) -> Self {
        self.up_to_layer = Some(layer);
        self
    }

    #[must_use]
    pub fn with_re_run_from(mut self, layer: usize) -> Self {
        self.re_run_from = Some(layer);
        self
    }

    fn validate(&self, layer_count: usize) -> Result<(), PlanOptionError> {
        if self.concurrency == 0 {
            return Err(PlanOptionError::InvalidConcurrency { requested: 0 });
        }
        if let (Some(re_run_from), Some(up_to_layer)) = (self.re_run_from, self.up_to_layer)
            && re_run_from > up_to_layer
        {
            return Err(PlanOptionError::ReRunFromBeyondUpToLayer {
                re_run_from,
                up_to_layer,
            });
        }
        if let Some(re_run_from) = self.re_run_from
            && re_run_from >= layer_count
        {
            return Err(PlanOptionError::ReRunFromOutOfRange {
                re_run_from,
                layer_count,
            });
        }
        Ok(())
    }
}

/// Failures that abort a run outright.
///
/// Job-level failures never surface here; they are recorded in the event
/// log and the [`RunResult`]. These errors mean the run itself could not
/// proceed: bad options, or the project directory refusing reads/writes.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error(transparent)]
    #[diagnostic(code(planloom::run::options))]
    Options(#[from] PlanOptionError),

    #[error(transparent)]
    #[diagnostic(code(planloom::run::event_log))]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    #[diagnostic(code(planloom::run::store))]
    Store(#[from] StoreError),
}

/// What one in-layer future resolved to, before persistence.
struct Executed<'a> {
    job: &'a JobDescriptor,
    outcome: Result<ProduceOutcome, JobError>,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

/// Executes [`ExecutionPlan`]s against an event log and blob store.
pub struct PlanRunner {
    log: Arc<dyn EventLog>,
    blobs: BlobStore,
    inputs: InputValues,
    progress: ProgressEmitter,
    cancel: CancelToken,
}

impl PlanRunner {
    pub fn new(log: Arc<dyn EventLog>, blobs: BlobStore, inputs: InputValues) -> Self {
        Self {
            log,
            blobs,
            inputs,
            progress: ProgressEmitter::disabled(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressEmitter) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The cancel token this runner observes.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs the plan to completion, cancellation, or a fatal error.
    ///
    /// The returned [`RunResult`] lists one entry per job that reached a
    /// terminal state; under cancellation, jobs that never started are
    /// absent. The run as a whole fails only through [`RunnerError`];
    /// provider failures land in the result and the event log.
    #[instrument(
        skip_all,
        fields(
            revision = %plan.revision,
            layers = plan.layers.len(),
            jobs = plan.job_count(),
        ),
        err
    )]
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        producer: Arc<dyn Produce>,
        options: &RunOptions,
    ) -> Result<RunResult, RunnerError> {
        options.validate(plan.layers.len())?;

        let events = self.log.read_all().await?;
        let mut running = Manifest::fold(plan.revision.clone(), &events);
        if running.content_hash() != plan.manifest_base_hash {
            tracing::warn!(
                target: "planloom::runner",
                revision = %plan.revision,
                "event log advanced since the plan was built; some planned work may be stale"
            );
        }

        self.progress.emit(ProgressEvent::RunStarted {
            revision: plan.revision.clone(),
            layers: plan.layers.len(),
            jobs: plan.job_count(),
        });

        let mut results: Vec<JobResult> = Vec::new();

        for (layer_index, layer) in plan.layers.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(limit) = options.up_to_layer
                && layer_index > limit
            {
                break;
            }
            if layer.is_empty() {
                self.progress
                    .emit(ProgressEvent::LayerEmpty { layer: layer_index });
                continue;
            }
            if let Some(first) = options.re_run_from
                && layer_index < first
            {
                self.progress.emit(ProgressEvent::LayerSkipped {
                    layer: layer_index,
                    reason: "reRunFrom".to_string(),
                });
                let now = Utc::now();
                for job in layer {
                    results.push(JobResult {
                        job_id: job.job_id.clone(),
                        status: JobStatus::Skipped,
                        artifacts: Vec::new(),
                        diagnostics: Some(Diagnostics::new("reRunFrom")),
                        layer_index,
                        attempt: 1,
                        started_at: now,
                        completed_at: now,
                    });
                }
                continue;
            }

            self.progress.emit(ProgressEvent::LayerStarted {
                layer: layer_index,
                jobs: layer.len(),
            });

            let snapshot = Arc::new(running.clone());
            let layer_span = tracing::info_span!("layer", layer = layer_index, jobs = layer.len());
            let executed = layer_span
                .in_scope(|| {
                    self.execute_layer(plan, layer_index, layer, &snapshot, &producer, options)
                })
                .await;

            let layer_events = self
                .record_layer(plan, layer_index, &snapshot, executed, &mut results)
                .await?;
            for event in &layer_events {
                running.apply(event);
            }

            self.progress
                .emit(ProgressEvent::LayerCompleted { layer: layer_index });
        }

        let status = if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if results.iter().any(|r| r.status == JobStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        self.progress.emit(ProgressEvent::RunCompleted {
            revision: plan.revision.clone(),
            status,
        });
        tracing::info!(
            target: "planloom::runner",
            revision = %plan.revision,
            jobs = results.len(),
            ?status,
            "run finished"
        );

        Ok(RunResult {
            revision: plan.revision.clone(),
            status,
            jobs: results,
        })
    }

    /// The manifest as of everything recorded so far.
    pub async fn build_manifest(&self, revision: Revision) -> Result<Manifest, EventLogError> {
        let events = self.log.read_all().await?;
        Ok(Manifest::fold(revision, &events))
    }

    /// Runs one layer's jobs under the concurrency bound.
    ///
    /// Futures are polled from this task rather than spawned, so they may
    /// borrow the plan's descriptors directly. Results come back in
    /// completion order and are sorted by job id before recording, which
    /// keeps the event log deterministic for a given set of outcomes.
    async fn execute_layer<'a>(
        &self,
        plan: &ExecutionPlan,
        layer_index: usize,
        layer: &'a [JobDescriptor],
        snapshot: &Arc<Manifest>,
        producer: &Arc<dyn Produce>,
        options: &RunOptions,
    ) -> Vec<Executed<'a>> {
        let semaphore = Arc::new(Semaphore::new(options.concurrency));
        let mut in_flight = FuturesUnordered::new();

        for job in layer {
            let semaphore = Arc::clone(&semaphore);
            let producer = Arc::clone(producer);
            let emitter = self.progress.clone();
            let cancel = self.cancel.clone();
            let ctx = RunContext {
                revision: plan.revision.clone(),
                layer_index,
                inputs: self.inputs.clone(),
                manifest: Arc::clone(snapshot),
                blobs: self.blobs.clone(),
                cancel: cancel.clone(),
            };

            in_flight.push(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let now = Utc::now();
                        return Executed {
                            job,
                            outcome: Err(JobError::new("semaphore closed unexpectedly")),
                            started_at: now,
                            completed_at: now,
                        };
                    }
                };
                if cancel.is_cancelled() {
                    let now = Utc::now();
                    return Executed {
                        job,
                        outcome: Ok(ProduceOutcome::skipped("cancelled")),
                        started_at: now,
                        completed_at: now,
                    };
                }

                emitter.emit(ProgressEvent::JobStarted {
                    layer: layer_index,
                    job_id: job.job_id.clone(),
                });
                let started_at = Utc::now();
                let outcome = producer.produce(job, ctx).await;
                let completed_at = Utc::now();
                let status = match &outcome {
                    Ok(ProduceOutcome::Succeeded { .. }) => JobStatus::Succeeded,
                    Ok(ProduceOutcome::Skipped { .. }) => JobStatus::Skipped,
                    Ok(ProduceOutcome::Failed { .. }) | Err(_) => JobStatus::Failed,
                };
                emitter.emit(ProgressEvent::JobCompleted {
                    layer: layer_index,
                    job_id: job.job_id.clone(),
                    status,
                });

                Executed {
                    job,
                    outcome,
                    started_at,
                    completed_at,
                }
            });
        }

        let mut executed = Vec::with_capacity(layer.len());
        while let Some(done) = in_flight.next().await {
            executed.push(done);
        }
        executed.sort_by(|a, b| a.job.job_id.cmp(&b.job.job_id));
        executed
    }

    /// Persists one layer's outcomes: blobs first, then one event per
    /// output, appended to the log in job-id order.
    ///
    /// Input hashes are computed against the layer's snapshot, the exact
    /// view the jobs consumed. Skipped jobs record nothing.
    async fn record_layer(
        &self,
        plan: &ExecutionPlan,
        layer_index: usize,
        snapshot: &Manifest,
        executed: Vec<Executed<'_>>,
        results: &mut Vec<JobResult>,
    ) -> Result<Vec<ArtifactEvent>, RunnerError> {
        let mut layer_events = Vec::new();

        for done in executed {
            let job = done.job;
            let mut result = JobResult {
                job_id: job.job_id.clone(),
                status: JobStatus::Skipped,
                artifacts: Vec::new(),
                diagnostics: None,
                layer_index,
                attempt: 1,
                started_at: done.started_at,
                completed_at: done.completed_at,
            };

            match done.outcome {
                Ok(ProduceOutcome::Succeeded { artifacts }) => {
                    let hash = job.inputs_hash(snapshot, &self.inputs);
                    for artifact in artifacts {
                        let blob = self
                            .persist_artifact(&artifact.value, artifact.mime_type.as_deref())
                            .await?;
                        layer_events.push(ArtifactEvent::succeeded(
                            artifact.artifact_id.clone(),
                            plan.revision.clone(),
                            hash.clone(),
                            blob,
                            job.job_id.clone(),
                        ));
                        result.artifacts.push(artifact.artifact_id);
                    }
                    result.status = JobStatus::Succeeded;
                }
                Ok(ProduceOutcome::Failed { diagnostics }) => {
                    let hash = job.inputs_hash(snapshot, &self.inputs);
                    for output in &job.produces {
                        layer_events.push(ArtifactEvent::failed(
                            output.clone(),
                            plan.revision.clone(),
                            hash.clone(),
                            job.job_id.clone(),
                            diagnostics.clone(),
                        ));
                    }
                    result.status = JobStatus::Failed;
                    result.diagnostics = Some(diagnostics);
                }
                Err(error) => {
                    let hash = job.inputs_hash(snapshot, &self.inputs);
                    let diagnostics = Diagnostics::failure(error.to_string());
                    for output in &job.produces {
                        layer_events.push(ArtifactEvent::failed(
                            output.clone(),
                            plan.revision.clone(),
                            hash.clone(),
                            job.job_id.clone(),
                            diagnostics.clone(),
                        ));
                    }
                    result.status = JobStatus::Failed;
                    result.diagnostics = Some(diagnostics);
                }
                Ok(ProduceOutcome::Skipped { reason }) => {
                    result.diagnostics = Some(Diagnostics::new(reason));
                }
            }

            results.push(result);
        }

        for event in &layer_events {
            self.log.append(event).await?;
        }
        Ok(layer_events)
    }

    /// Stores one produced value and returns its blob ref.
    ///
    /// A raw byte value stores under its declared mime type; any other
    /// value first externalizes nested buffers, then stores as canonical
    /// JSON so equal values always hash identically.
    async fn persist_artifact(
        &self,
        value: &Value,
        mime_type: Option<&str>,
    ) -> Result<BlobRef, StoreError> {
        let declared = mime_type.unwrap_or("application/octet-stream");
        let stored = externalize(&self.blobs, value, declared).await?;
        match stored {
            Value::Blob(blob) => Ok(blob),
            other => {
                let bytes = canonical_json(&other.to_json()).into_bytes();
                self.blobs.persist(&bytes, "application/json").await
            }
        }
    }
}
