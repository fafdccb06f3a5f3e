//! Dirty rules, per-artifact precedence, and forward propagation.
//!
//! An artifact must be regenerated when it has no manifest entry, its
//! recorded `inputs_hash` no longer matches the freshly computed one, its
//! last event failed and was not recovered, or it is explicitly targeted.
//! Pinned artifacts are force-excluded even when dirty, unless also
//! targeted. A job runs when any of its declared outputs must run; every
//! included job then dirties its downstream consumers, since their input
//! hashes will change once the upstream artifact is regenerated.

use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

use super::PlanOptions;
use crate::events::ArtifactStatus;
use crate::jobs::{JobDescriptor, JobGraph};
use crate::manifest::Manifest;
use crate::types::{JobId, NodeId};
use crate::value::InputValues;

/// Why an artifact entered the rerun set. Logged, not persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DirtyReason {
    Targeted,
    MissingEntry,
    HashMismatch,
    FailedBefore,
}

impl DirtyReason {
    fn as_str(self) -> &'static str {
        match self {
            DirtyReason::Targeted => "targeted",
            DirtyReason::MissingEntry => "missing_entry",
            DirtyReason::HashMismatch => "hash_mismatch",
            DirtyReason::FailedBefore => "failed_before",
        }
    }
}

/// Whether `ids` singles out this job as a whole (by its producer node id).
fn names_job(ids: &[NodeId], job: &JobDescriptor) -> bool {
    ids.iter()
        .any(|id| id.is_producer() && JobId::of(id) == job.job_id)
}

/// Jobs that must run, after per-artifact precedence and propagation.
pub(crate) fn evaluate(
    graph: &JobGraph,
    manifest: &Manifest,
    inputs: &InputValues,
    options: &PlanOptions,
) -> BTreeSet<JobId> {
    let mut included = BTreeSet::new();

    for job in graph.jobs() {
        let targeted_job = names_job(&options.target_artifact_ids, job);
        let pinned_job = names_job(&options.pinned_ids, job);
        let computed = job.inputs_hash(manifest, inputs);

        for artifact in &job.produces {
            let targeted = targeted_job || options.target_artifact_ids.contains(artifact);
            let pinned = pinned_job || options.pinned_ids.contains(artifact);

            let reason = if targeted {
                Some(DirtyReason::Targeted)
            } else if pinned {
                None
            } else {
                match manifest.artifact(artifact) {
                    None => Some(DirtyReason::MissingEntry),
                    Some(entry) if entry.status == ArtifactStatus::Failed => {
                        Some(DirtyReason::FailedBefore)
                    }
                    Some(entry) if entry.inputs_hash != computed => {
                        Some(DirtyReason::HashMismatch)
                    }
                    Some(_) => None,
                }
            };

            if let Some(reason) = reason {
                debug!(
                    target: "planloom::planner",
                    job = %job.job_id,
                    artifact = %artifact,
                    reason = reason.as_str(),
                    "artifact must be regenerated"
                );
                included.insert(job.job_id.clone());
            }
        }
    }

    propagate(graph, options, &mut included);
    included
}

/// Forward BFS: once a job runs, its outputs change, so each downstream
/// consumer with at least one non-pinned (or targeted) output runs too.
/// Fully pinned consumers keep their outputs, so propagation stops there.
fn propagate(graph: &JobGraph, options: &PlanOptions, included: &mut BTreeSet<JobId>) {
    let mut queue: VecDeque<JobId> = included.iter().cloned().collect();

    while let Some(upstream) = queue.pop_front() {
        for downstream in graph.downstream_of(&upstream) {
            if included.contains(downstream) {
                continue;
            }
            let Some(job) = graph.job(downstream) else {
                continue;
            };

            let targeted_job = names_job(&options.target_artifact_ids, job);
            let pinned_job = names_job(&options.pinned_ids, job);
            let runs = job.produces.iter().any(|artifact| {
                let targeted = targeted_job || options.target_artifact_ids.contains(artifact);
                let pinned = pinned_job || options.pinned_ids.contains(artifact);
                targeted || !pinned
            });

            if runs {
                debug!(
                    target: "planloom::planner",
                    upstream = %upstream,
                    job = %downstream,
                    "dirtied by upstream regeneration"
                );
                included.insert(downstream.clone());
                queue.push_back(downstream.clone());
            }
        }
    }
}
