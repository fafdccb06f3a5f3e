//! Producer graph assembly: canonical graph → executable job graph.
//!
//! One job per producer node. Assembly resolves each producer's provider
//! binding through the catalog, gathers its full input set (consumed edges,
//! fan-in members, and any model-selection inputs), prepares the closed
//! [`JobContext`], and derives job-to-job dependency edges by mapping every
//! consumed artifact to the job that writes it.

use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::blueprint::{Blueprint, CanonicalBlueprint, ProducerSpec};
use crate::catalog::{CatalogError, ProducerOptionsMap, ProviderCatalog};
use crate::jobs::{
    InputConditionInfo, JobContext, JobDescriptor, JobGraph, SlotBinding, SlotSource,
    ValidationError,
};
use crate::types::{JobId, NodeId, NodeKind};
use crate::value::InputValues;

/// Failures raised while assembling the job graph.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum AssembleError {
    #[error(transparent)]
    #[diagnostic(code(planloom::assemble::catalog))]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    #[diagnostic(code(planloom::assemble::validation))]
    Validation(#[from] ValidationError),
}

/// Assembles the canonical graph into executable jobs.
///
/// Pure except for catalog lookups; the canonical graph is consumed
/// read-only. Model-selection inputs named by the options become part of the
/// owning job's input set so a changed selection dirties the job at the next
/// plan.
#[instrument(skip_all, fields(blueprint = blueprint.name()), err)]
pub fn assemble(
    blueprint: &Blueprint,
    canonical: &CanonicalBlueprint,
    catalog: &ProviderCatalog,
    options: &ProducerOptionsMap,
    inputs: &InputValues,
) -> Result<JobGraph, AssembleError> {
    validate_edges(canonical)?;

    let specs: FxHashMap<&str, &ProducerSpec> = blueprint
        .producers()
        .iter()
        .map(|p| (p.path.as_str(), p))
        .collect();

    // Artifact id → the job that writes it, from produce edges.
    let mut producer_of: BTreeMap<NodeId, JobId> = BTreeMap::new();
    for edge in &canonical.edges {
        if edge.from.is_producer() && edge.to.is_artifact() && edge.slot.is_none() {
            producer_of.insert(edge.to.clone(), JobId::of(&edge.from));
        }
    }

    let mut jobs: BTreeMap<JobId, JobDescriptor> = BTreeMap::new();
    for node in canonical.producers() {
        let alias = node
            .alias
            .as_deref()
            .ok_or_else(|| ValidationError::MissingAlias {
                producer: node.id.clone(),
            })?;
        let producer_options = options.get(node.id.path());
        let binding = catalog.resolve(alias, producer_options, inputs)?;
        let job_id = JobId::of(&node.id);

        let mut consumed: BTreeSet<NodeId> = BTreeSet::new();
        let mut bindings: Vec<SlotBinding> = Vec::new();
        let mut conditions: Vec<InputConditionInfo> = Vec::new();
        let mut fan_in = BTreeMap::new();
        let mut seen_slots: BTreeSet<&str> = BTreeSet::new();

        for edge in canonical.edges_into(&node.id) {
            let Some(slot) = edge.slot.as_deref() else {
                continue;
            };
            if let Some(condition) = &edge.condition
                && seen_slots.insert(slot)
            {
                // Fan-in member edges repeat the slot's condition; record it
                // once per slot, at the consumer instance's indices.
                conditions.push(InputConditionInfo {
                    slot: slot.to_string(),
                    condition: condition.clone(),
                    indices: edge.indices.clone(),
                });
            }

            match canonical.fan_in_for(&node.id, slot) {
                Some(descriptor) => {
                    for member in &descriptor.members {
                        consumed.insert(member.id.clone());
                    }
                    if !fan_in.contains_key(&descriptor.key) {
                        bindings.push(SlotBinding {
                            slot: slot.to_string(),
                            source: SlotSource::FanIn {
                                key: descriptor.key.clone(),
                            },
                        });
                        fan_in.insert(descriptor.key.clone(), descriptor.clone());
                    }
                }
                None => {
                    consumed.insert(edge.from.clone());
                    bindings.push(SlotBinding {
                        slot: slot.to_string(),
                        source: SlotSource::Single {
                            id: edge.from.clone(),
                        },
                    });
                }
            }
        }

        for input in &binding.selection_inputs {
            consumed.insert(NodeId::input(input));
        }

        let produces: Vec<NodeId> = canonical
            .edges_from(&node.id)
            .filter(|e| e.slot.is_none() && e.to.is_artifact())
            .map(|e| e.to.clone())
            .collect();

        let spec = specs.get(node.id.path());
        jobs.insert(
            job_id.clone(),
            JobDescriptor {
                job_id,
                producer: alias.to_string(),
                inputs: consumed.into_iter().collect(),
                produces,
                provider: binding.provider,
                provider_model: binding.provider_model,
                context: JobContext {
                    bindings,
                    fan_in,
                    conditions,
                    schema: spec.and_then(|s| s.output_schema.clone()),
                    settings: producer_options.and_then(|o| o.settings.clone()),
                },
            },
        );
    }

    // Job-to-job edges: every consumed artifact must have a producing job.
    let mut edges: BTreeSet<(JobId, JobId)> = BTreeSet::new();
    for job in jobs.values() {
        for id in &job.inputs {
            if !id.is_artifact() {
                continue;
            }
            let upstream =
                producer_of
                    .get(id)
                    .ok_or_else(|| ValidationError::UnproducedArtifact {
                        artifact: id.clone(),
                        consumer: job.job_id.clone(),
                    })?;
            if *upstream != job.job_id {
                edges.insert((upstream.clone(), job.job_id.clone()));
            }
        }
    }

    Ok(JobGraph::new(jobs, edges.into_iter().collect(), producer_of))
}

/// Checks every canonical edge fits one of the two legal shapes.
fn validate_edges(canonical: &CanonicalBlueprint) -> Result<(), ValidationError> {
    for edge in &canonical.edges {
        let legal = match edge.slot {
            // Produce edge.
            None => edge.from.is_producer() && edge.to.is_artifact(),
            // Consume edge.
            Some(_) => {
                matches!(edge.from.kind(), NodeKind::Input | NodeKind::Artifact)
                    && edge.to.is_producer()
            }
        };
        if !legal {
            return Err(ValidationError::InvalidEdgeEndpoint {
                from: edge.from.clone(),
                to: edge.to.clone(),
                reason: match edge.slot {
                    None => "produce edges run producer to artifact".to_string(),
                    Some(_) => "consume edges run input or artifact to producer".to_string(),
                },
            });
        }
    }
    for binding in &canonical.input_bindings {
        if !binding.consumer.is_producer() {
            return Err(ValidationError::InvalidBindingTarget {
                input: binding.input.clone(),
                consumer: binding.consumer.clone(),
            });
        }
    }
    Ok(())
}
