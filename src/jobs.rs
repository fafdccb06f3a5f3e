//! Executable job descriptors and the job-level dependency graph.
//!
//! The assembler turns canonical nodes into [`JobDescriptor`]s: one per
//! producer node, carrying its resolved provider binding, its full input and
//! output id sets, and a closed [`JobContext`] with everything execution
//! needs (slot bindings, fan-in descriptors, gating conditions, the output
//! schema, settings). The planner and runner read descriptors, never the
//! canonical graph.
//!
//! [`JobDescriptor::inputs_hash`] is the engine's cache key. The planner
//! computes it against the prior manifest to detect dirty jobs; the runner
//! recomputes it against the running manifest just before invocation so the
//! recorded events reflect the upstream content the job actually saw.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::blueprint::{ConditionSpec, FanInDescriptor, SchemaNode};
use crate::hashing::{hash_json, hash_value};
use crate::manifest::Manifest;
use crate::types::{JobId, NodeId, NodeKind};
use crate::value::{InputValues, Value};

/// Defects found while preparing job contexts from the canonical graph.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum ValidationError {
    /// A consumed artifact id that no job in the graph produces.
    #[error("artifact {artifact} consumed by job {consumer} has no producing job")]
    #[diagnostic(
        code(planloom::jobs::unproduced_artifact),
        help("every consumed Artifact: id must be written by some producer node")
    )]
    UnproducedArtifact { artifact: NodeId, consumer: JobId },

    /// An edge whose endpoints do not fit its role.
    #[error("edge {from} -> {to} is invalid: {reason}")]
    #[diagnostic(code(planloom::jobs::invalid_edge))]
    InvalidEdgeEndpoint {
        from: NodeId,
        to: NodeId,
        reason: String,
    },

    /// An input binding that targets something other than a producer node.
    #[error("input {input} is bound to {consumer}, which is not a producer")]
    #[diagnostic(code(planloom::jobs::invalid_binding_target))]
    InvalidBindingTarget { input: NodeId, consumer: NodeId },

    /// A producer node that reached assembly without an alias.
    #[error("producer node {producer} carries no alias")]
    #[diagnostic(code(planloom::jobs::missing_alias))]
    MissingAlias { producer: NodeId },
}

/// Where a consumed slot's value comes from at execution time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotSource {
    /// One upstream artifact or external input.
    Single { id: NodeId },
    /// An ordered collection, keyed into [`JobContext::fan_in`].
    FanIn { key: String },
}

/// Binds one consumed slot to its source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotBinding {
    pub slot: String,
    pub source: SlotSource,
}

/// A condition gating one consumed slot, pinned to the consumer instance's
/// loop indices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputConditionInfo {
    pub slot: String,
    pub condition: ConditionSpec,
    pub indices: Vec<usize>,
}

/// Everything a job needs at execution time beyond its id sets.
///
/// This is a closed structure: adapters get typed fields, not a grab-bag
/// map, so the assembler and the provider boundary share one contract.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    pub bindings: Vec<SlotBinding>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fan_in: BTreeMap<String, FanInDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<InputConditionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

/// One unit of executable work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: JobId,
    /// Producer alias, the catalog key this job was resolved under.
    pub producer: String,
    /// Every id this job reads: inputs, upstream artifacts, fan-in members.
    /// Sorted and deduplicated.
    pub inputs: Vec<NodeId>,
    /// Artifact ids this job writes.
    pub produces: Vec<NodeId>,
    pub provider: String,
    pub provider_model: String,
    pub context: JobContext,
}

impl JobDescriptor {
    /// Cache key over everything that can change this job's output.
    ///
    /// Covers the content identity of every consumed id (blob hash for
    /// materialized artifacts, value hash for bound inputs, an explicit
    /// absent marker otherwise), fan-in member order per slot, the provider
    /// binding, and settings. Two jobs with equal hashes would produce
    /// byte-identical requests.
    pub fn inputs_hash(&self, manifest: &Manifest, inputs: &InputValues) -> String {
        let mut consumed = BTreeMap::new();
        for id in &self.inputs {
            let descriptor = match id.kind() {
                NodeKind::Input => match inputs.get(id.path()) {
                    Some(value) => format!("value:{}", hash_value(value)),
                    None => format!("absent:{id}"),
                },
                NodeKind::Artifact | NodeKind::Producer => {
                    match manifest.artifact(id).and_then(|entry| entry.blob.as_ref()) {
                        Some(blob) => blob.hash.clone(),
                        None => format!("absent:{id}"),
                    }
                }
            };
            consumed.insert(id.encode(), descriptor);
        }

        let fan_in: BTreeMap<&String, Vec<&NodeId>> = self
            .context
            .fan_in
            .iter()
            .map(|(key, descriptor)| {
                (key, descriptor.members.iter().map(|m| &m.id).collect())
            })
            .collect();

        hash_json(&serde_json::json!({
            "fanIn": fan_in,
            "inputs": consumed,
            "provider": self.provider,
            "providerModel": self.provider_model,
            "settings": self.context.settings.as_ref().map(Value::to_json),
        }))
    }
}

/// The assembled job graph: descriptors plus job-to-job dependency edges.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobGraph {
    jobs: BTreeMap<JobId, JobDescriptor>,
    /// `upstream -> downstream`, deduplicated.
    edges: Vec<(JobId, JobId)>,
    /// Artifact id → the job that writes it.
    producer_of: BTreeMap<NodeId, JobId>,
}

impl JobGraph {
    pub(crate) fn new(
        jobs: BTreeMap<JobId, JobDescriptor>,
        edges: Vec<(JobId, JobId)>,
        producer_of: BTreeMap<NodeId, JobId>,
    ) -> Self {
        Self {
            jobs,
            edges,
            producer_of,
        }
    }

    pub fn job(&self, id: &JobId) -> Option<&JobDescriptor> {
        self.jobs.get(id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn edges(&self) -> &[(JobId, JobId)] {
        &self.edges
    }

    /// The job that writes a given artifact id, if any.
    pub fn producer_of_artifact(&self, artifact: &NodeId) -> Option<&JobId> {
        self.producer_of.get(artifact)
    }

    /// Jobs that depend on `upstream`, directly.
    pub fn downstream_of<'a>(&'a self, upstream: &'a JobId) -> impl Iterator<Item = &'a JobId> {
        self.edges
            .iter()
            .filter(move |(from, _)| from == upstream)
            .map(|(_, to)| to)
    }
}
