//! The planner: recovery prepass, dirty detection, and plan layering.
//!
//! Planning turns an assembled [`JobGraph`] plus the event log into the
//! minimal [`ExecutionPlan`] for one revision. The manifest is folded from
//! the log, recoverable failures are settled against the provider, dirty
//! jobs are found and propagated downstream, and the surviving set is
//! layered into parallel-safe waves. Clean jobs never appear in the plan;
//! re-planning an unchanged project yields zero layers.
//!
//! Plans are pure descriptions. Nothing here invokes a provider; the
//! prepass's blob writes and appended `succeeded` events are the only side
//! effects.

mod dirty;
mod recovery;

pub use recovery::{
    DownloadedBinary, FailedRecovery, MemoryRecovery, ProviderStatus, RecoveryClient,
    RecoveryError, RecoverySummary,
};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::events::{EventLog, EventLogError};
use crate::jobs::{JobDescriptor, JobGraph};
use crate::layering;
use crate::manifest::Manifest;
use crate::store::{BlobStore, StoreError};
use crate::types::{JobId, NodeId, Revision};
use crate::value::InputValues;

/// Fatal planning failures.
#[derive(Debug, Error, Diagnostic)]
pub enum PlanError {
    /// The job graph is not a DAG. Nothing can be scheduled.
    #[error("job graph contains a dependency cycle")]
    #[diagnostic(
        code(planloom::plan::cycle),
        help("a producer transitively consumes its own output; break the loop in the blueprint")
    )]
    CycleDetected,

    #[error(transparent)]
    #[diagnostic(code(planloom::plan::event_log))]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    #[diagnostic(code(planloom::plan::store))]
    Store(#[from] StoreError),
}

/// Caller directives for one planning pass.
///
/// Targets force regeneration, pins force exclusion; both accept artifact
/// ids or producer node ids (a producer id covers all of that job's
/// outputs). Precedence per artifact: target, then pin, then dirtiness.
#[derive(Clone, Debug, Default)]
pub struct PlanOptions {
    pub target_artifact_ids: Vec<NodeId>,
    pub pinned_ids: Vec<NodeId>,
}

impl PlanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces regeneration of one artifact (or a whole producer).
    #[must_use]
    pub fn with_target(mut self, id: NodeId) -> Self {
        self.target_artifact_ids.push(id);
        self
    }

    /// Excludes one artifact (or a whole producer) from the rerun set,
    /// even if dirty, unless also targeted.
    #[must_use]
    pub fn with_pin(mut self, id: NodeId) -> Self {
        self.pinned_ids.push(id);
        self
    }
}

/// The jobs one revision will run, in parallel-safe waves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub revision: Revision,
    /// Ascending waves; jobs within a wave share no dependency edges.
    pub layers: Vec<Vec<JobDescriptor>>,
    /// Content hash of the manifest this plan was computed against, for
    /// detecting out-of-band mutation before a run.
    pub manifest_base_hash: String,
}

impl ExecutionPlan {
    pub fn job_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(Vec::is_empty)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.layers.iter().flatten()
    }
}

/// Everything a planning pass produced.
#[derive(Debug)]
pub struct PlanReport {
    pub plan: ExecutionPlan,
    /// What the recovery prepass did; empty when no recovery client is set
    /// or no recoverable failures exist.
    pub recovery: RecoverySummary,
    /// The folded manifest the plan was computed against, including any
    /// artifacts the prepass recovered.
    pub base_manifest: Manifest,
}

/// Builds execution plans from the event log and an assembled job graph.
pub struct Planner {
    log: Arc<dyn EventLog>,
    store: BlobStore,
    recovery: Option<Arc<dyn RecoveryClient>>,
}

impl Planner {
    pub fn new(log: Arc<dyn EventLog>, store: BlobStore) -> Self {
        Self {
            log,
            store,
            recovery: None,
        }
    }

    /// Enables the failure-recovery prepass.
    #[must_use]
    pub fn with_recovery(mut self, client: Arc<dyn RecoveryClient>) -> Self {
        self.recovery = Some(client);
        self
    }

    /// Plans one revision.
    ///
    /// Fails fast on a cyclic job graph, then folds the manifest, runs the
    /// recovery prepass (when configured), evaluates dirtiness with
    /// per-artifact target/pin precedence, propagates downstream, and
    /// layers the included jobs.
    #[instrument(skip_all, fields(revision = %revision, jobs = graph.len()), err)]
    pub async fn plan(
        &self,
        revision: Revision,
        graph: &JobGraph,
        inputs: &InputValues,
        options: &PlanOptions,
    ) -> Result<PlanReport, PlanError> {
        let all_jobs: Vec<JobId> = graph.jobs().map(|job| job.job_id.clone()).collect();
        if layering::layer(&all_jobs, graph.edges()).has_cycle {
            return Err(PlanError::CycleDetected);
        }

        let events = self.log.read_all().await?;
        let fold_span = tracing::info_span!("fold", events = events.len());
        let mut manifest = fold_span.in_scope(|| Manifest::fold(revision.clone(), &events));

        let mut recovery_summary = RecoverySummary::default();
        if let Some(client) = &self.recovery {
            let recovery_span = tracing::info_span!("recovery", entries = manifest.len());
            let (summary, appended) = recovery_span
                .in_scope(|| {
                    recovery::prepass(
                        &manifest,
                        &events,
                        &revision,
                        &self.store,
                        self.log.as_ref(),
                        client.as_ref(),
                    )
                })
                .await?;
            recovery_summary = summary;
            for event in &appended {
                manifest.apply(event);
            }
        }

        let dirty_span = tracing::info_span!("dirty", jobs = graph.len());
        let included = dirty_span.in_scope(|| dirty::evaluate(graph, &manifest, inputs, options));
        let included_jobs: Vec<JobId> = included.iter().cloned().collect();
        // Edges touching excluded jobs drop out inside the layering; those
        // dependencies are already materialized.
        let layer_span = tracing::info_span!("layering", included = included_jobs.len());
        let sub = layer_span.in_scope(|| layering::layer(&included_jobs, graph.edges()));
        let layers: Vec<Vec<JobDescriptor>> = sub
            .layers()
            .into_iter()
            .map(|wave| {
                wave.into_iter()
                    .filter_map(|id| graph.job(&id).cloned())
                    .collect()
            })
            .collect();

        let plan = ExecutionPlan {
            revision,
            layers,
            manifest_base_hash: manifest.content_hash(),
        };
        info!(
            target: "planloom::planner",
            revision = %plan.revision,
            jobs = plan.job_count(),
            layers = plan.layers.len(),
            recovered = recovery_summary.recovered_artifact_ids.len(),
            "execution plan built"
        );
        Ok(PlanReport {
            plan,
            recovery: recovery_summary,
            base_manifest: manifest,
        })
    }
}
