//! Canonical graph builder: blueprint document → flat concrete graph.
//!
//! Expansion resolves the three dynamic constructs of the document form:
//!
//! - **loops**: a producer inside dimensions `[a][b]` becomes one
//!   `Producer:path[i][j]` node per index combination, outermost dimension
//!   first, artifacts alongside;
//! - **fan-in**: a consumer that lacks a dimension of its source collects
//!   every iteration of that dimension into an ordered
//!   [`FanInDescriptor`](super::FanInDescriptor);
//! - **conditions**: named/inline predicates are decomposed against the
//!   producing side's output schema into concrete
//!   [`ConditionSpec`](super::ConditionSpec) tuples carried on edges.
//!
//! The pass is pure: `(document, loop counts) → CanonicalBlueprint`, no I/O,
//! with every cross-reference validated before any node is emitted.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::debug;

use super::canonical::{
    CanonicalBlueprint, CanonicalEdge, CanonicalNode, ConditionSpec, FanInDescriptor, FanInMember,
    InputBinding, fan_in_key,
};
use super::document::{
    Blueprint, ConditionDef, ConditionRef, LoopCount, ProducerSpec, SourceRef,
};
use super::schema::{FieldPath, SchemaCache};
use super::GraphError;
use crate::types::NodeId;
use crate::value::{InputValues, Value};

/// Resolved iteration counts, keyed by loop name.
pub type LoopCountMap = BTreeMap<String, usize>;

/// Resolves every declared loop to a concrete count.
///
/// Fixed loops use their declared count; from-input loops read a
/// non-negative integer from the bound input value.
pub fn resolve_loop_counts(
    blueprint: &Blueprint,
    inputs: &InputValues,
) -> Result<LoopCountMap, GraphError> {
    let declared_inputs: FxHashSet<&str> = blueprint
        .inputs()
        .iter()
        .map(|i| i.name.as_str())
        .collect();

    let mut counts = LoopCountMap::new();
    for spec in blueprint.loops() {
        let count = match &spec.count {
            LoopCount::Fixed(n) => *n,
            LoopCount::FromInput(input) => {
                if !declared_inputs.contains(input.as_str()) {
                    return Err(GraphError::InvalidLoopCount {
                        name: spec.name.clone(),
                        reason: format!("references undeclared input {input:?}"),
                    });
                }
                let value = inputs.get(input).ok_or_else(|| GraphError::MissingLoopCount {
                    name: spec.name.clone(),
                })?;
                match value {
                    Value::Number(n) => n.as_u64().map(|n| n as usize).ok_or_else(|| {
                        GraphError::InvalidLoopCount {
                            name: spec.name.clone(),
                            reason: format!("input {input:?} is not a non-negative integer"),
                        }
                    })?,
                    other => {
                        return Err(GraphError::InvalidLoopCount {
                            name: spec.name.clone(),
                            reason: format!(
                                "input {input:?} must be a number, got {other:?}"
                            ),
                        });
                    }
                }
            }
        };
        counts.insert(spec.name.clone(), count);
    }
    Ok(counts)
}

/// Expands a blueprint into its canonical graph.
///
/// `counts` must cover every loop any producer or condition references
/// (see [`resolve_loop_counts`]). The output is deterministic: nodes follow
/// producer declaration order, instances follow lexicographic index order,
/// and fan-in members carry explicit order fields.
pub fn expand(
    blueprint: &Blueprint,
    counts: &LoopCountMap,
) -> Result<CanonicalBlueprint, GraphError> {
    let index = DeclIndex::build(blueprint)?;
    let mut cache = SchemaCache::new();

    // Named conditions expand once, up front.
    let mut named: FxHashMap<&str, ConditionSpec> = FxHashMap::default();
    for (name, def) in blueprint.conditions() {
        let spec = expand_condition(def, &index, &mut cache)?;
        named.insert(name.as_str(), spec);
    }

    let mut out = CanonicalBlueprint::default();
    let mut seen: FxHashSet<NodeId> = FxHashSet::default();

    // Pass one: producer and artifact nodes plus produce edges, so that
    // connection resolution can assume every target exists.
    for producer in blueprint.producers() {
        let dims = validated_dimensions(producer, counts, &index)?;
        for indices in index_vectors(&dims) {
            let producer_id = NodeId::producer(&producer.path).indexed(indices.iter().copied());
            seen.insert(producer_id.clone());
            out.nodes.push(CanonicalNode {
                id: producer_id.clone(),
                alias: Some(producer.alias.clone()),
            });
            for output in &producer.outputs {
                let artifact_id = NodeId::artifact(format!("{}.{}", producer.path, output))
                    .indexed(indices.iter().copied());
                seen.insert(artifact_id.clone());
                out.nodes.push(CanonicalNode {
                    id: artifact_id.clone(),
                    alias: None,
                });
                out.edges.push(CanonicalEdge {
                    from: producer_id.clone(),
                    to: artifact_id,
                    slot: None,
                    condition: None,
                    indices: indices.clone(),
                });
            }
        }
    }

    // Pass two: connections.
    for producer in blueprint.producers() {
        let dims = validated_dimensions(producer, counts, &index)?;
        let dim_position: FxHashMap<&str, usize> = producer
            .dimensions
            .iter()
            .enumerate()
            .map(|(pos, name)| (name.as_str(), pos))
            .collect();

        for indices in index_vectors(&dims) {
            let consumer_id = NodeId::producer(&producer.path).indexed(indices.iter().copied());

            for conn in &producer.connections {
                let condition = match &conn.condition {
                    None => None,
                    Some(ConditionRef::Named(name)) => Some(
                        named
                            .get(name.as_str())
                            .cloned()
                            .ok_or_else(|| GraphError::UnknownCondition {
                                name: name.clone(),
                                consumer: producer.path.clone(),
                            })?,
                    ),
                    Some(ConditionRef::Inline(def)) => {
                        Some(expand_condition(def, &index, &mut cache)?)
                    }
                };

                match &conn.source {
                    SourceRef::Input(name) => {
                        if !index.inputs.contains(name.as_str()) {
                            return Err(GraphError::InputNotFound {
                                name: name.clone(),
                                consumer: producer.path.clone(),
                            });
                        }
                        let input_id = NodeId::input(name);
                        if seen.insert(input_id.clone()) {
                            out.nodes.push(CanonicalNode {
                                id: input_id.clone(),
                                alias: None,
                            });
                        }
                        out.edges.push(CanonicalEdge {
                            from: input_id.clone(),
                            to: consumer_id.clone(),
                            slot: Some(conn.slot.clone()),
                            condition,
                            indices: indices.clone(),
                        });
                        out.input_bindings.push(InputBinding {
                            input: input_id,
                            consumer: consumer_id.clone(),
                            slot: conn.slot.clone(),
                        });
                    }
                    SourceRef::Artifact(path) => {
                        let source = index.artifact(path, &producer.path)?;
                        let collected: Vec<&str> = source
                            .dimensions
                            .iter()
                            .map(String::as_str)
                            .filter(|d| !dim_position.contains_key(d))
                            .collect();

                        if collected.is_empty() {
                            let src_indices: Vec<usize> = source
                                .dimensions
                                .iter()
                                .map(|d| indices[dim_position[d.as_str()]])
                                .collect();
                            let artifact_id = NodeId::artifact(path).indexed(src_indices);
                            out.edges.push(CanonicalEdge {
                                from: artifact_id,
                                to: consumer_id.clone(),
                                slot: Some(conn.slot.clone()),
                                condition,
                                indices: indices.clone(),
                            });
                        } else {
                            let descriptor = expand_fan_in(
                                path,
                                source,
                                producer,
                                conn.order_by.as_deref(),
                                &conn.slot,
                                &collected,
                                &dim_position,
                                &indices,
                                counts,
                                &consumer_id,
                            )?;
                            for member in &descriptor.members {
                                out.edges.push(CanonicalEdge {
                                    from: member.id.clone(),
                                    to: consumer_id.clone(),
                                    slot: Some(conn.slot.clone()),
                                    condition: condition.clone(),
                                    indices: indices.clone(),
                                });
                            }
                            out.fan_in.insert(descriptor.key.clone(), descriptor);
                        }
                    }
                }
            }
        }
    }

    debug!(
        nodes = out.nodes.len(),
        edges = out.edges.len(),
        fan_in = out.fan_in.len(),
        blueprint = blueprint.name(),
        "expanded blueprint into canonical graph"
    );
    Ok(out)
}

/// Declaration lookup tables, plus duplicate detection.
struct DeclIndex<'a> {
    inputs: FxHashSet<&'a str>,
    loops: FxHashSet<&'a str>,
    producers: FxHashMap<&'a str, &'a ProducerSpec>,
    /// artifact path → producing producer
    artifacts: FxHashMap<String, &'a ProducerSpec>,
}

impl<'a> DeclIndex<'a> {
    fn build(blueprint: &'a Blueprint) -> Result<Self, GraphError> {
        let inputs = blueprint
            .inputs()
            .iter()
            .map(|i| i.name.as_str())
            .collect();
        let loops = blueprint
            .loops()
            .iter()
            .map(|l| l.name.as_str())
            .collect();

        let mut producers: FxHashMap<&str, &ProducerSpec> = FxHashMap::default();
        let mut artifacts: FxHashMap<String, &ProducerSpec> = FxHashMap::default();
        for producer in blueprint.producers() {
            if producers.insert(producer.path.as_str(), producer).is_some() {
                return Err(GraphError::DuplicateProducer {
                    path: producer.path.clone(),
                });
            }
            for output in &producer.outputs {
                let path = format!("{}.{}", producer.path, output);
                if artifacts.insert(path.clone(), producer).is_some() {
                    return Err(GraphError::DuplicateArtifact { path });
                }
            }
            let mut slots: FxHashSet<&str> = FxHashSet::default();
            for conn in &producer.connections {
                if !slots.insert(conn.slot.as_str()) {
                    return Err(GraphError::DuplicateSlot {
                        producer: producer.path.clone(),
                        slot: conn.slot.clone(),
                    });
                }
            }
        }

        Ok(Self {
            inputs,
            loops,
            producers,
            artifacts,
        })
    }

    /// Resolves an artifact path to its producing producer, with the error
    /// distinguishing "no such producer" from "producer has no such output".
    fn artifact(&self, path: &str, consumer: &str) -> Result<&'a ProducerSpec, GraphError> {
        if let Some(producer) = self.artifacts.get(path) {
            return Ok(producer);
        }
        if let Some((producer_path, output)) = path.rsplit_once('.')
            && self.producers.contains_key(producer_path)
        {
            return Err(GraphError::InvalidConnectionTarget {
                source: path.to_string(),
                consumer: consumer.to_string(),
                reason: format!("producer {producer_path:?} declares no output {output:?}"),
            });
        }
        Err(GraphError::ProducerNotFound {
            path: path.to_string(),
        })
    }
}

/// Checks a producer's dimensions and returns their concrete counts.
fn validated_dimensions(
    producer: &ProducerSpec,
    counts: &LoopCountMap,
    index: &DeclIndex<'_>,
) -> Result<Vec<usize>, GraphError> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut out = Vec::with_capacity(producer.dimensions.len());
    for dim in &producer.dimensions {
        if !index.loops.contains(dim.as_str()) {
            return Err(GraphError::UnknownLoop {
                name: dim.clone(),
                referenced_by: format!("producer {:?}", producer.path),
            });
        }
        if !seen.insert(dim.as_str()) {
            return Err(GraphError::DuplicateDimension {
                producer: producer.path.clone(),
                dimension: dim.clone(),
            });
        }
        out.push(
            *counts
                .get(dim)
                .ok_or_else(|| GraphError::MissingLoopCount { name: dim.clone() })?,
        );
    }
    Ok(out)
}

/// Expands one condition body into its concrete predicate tuple.
fn expand_condition(
    def: &ConditionDef,
    index: &DeclIndex<'_>,
    cache: &mut SchemaCache,
) -> Result<ConditionSpec, GraphError> {
    let producer = index.artifact(&def.artifact, "condition")?;
    let schema = producer
        .output_schema
        .as_ref()
        .ok_or_else(|| GraphError::MissingOutputSchema {
            producer: producer.path.clone(),
        })?;

    let path = FieldPath::parse(&def.field)?;
    let dimensions = cache.decompose(schema, &path, &def.artifact)?;
    for dim in &dimensions {
        if !index.loops.contains(dim.as_str()) {
            return Err(GraphError::UnknownLoop {
                name: dim.clone(),
                referenced_by: format!("condition on {:?}", def.artifact),
            });
        }
    }

    Ok(ConditionSpec {
        artifact: NodeId::artifact(&def.artifact),
        field_path: def.field.clone(),
        operator: def.operator,
        expected_values: def.expected.clone(),
        dimensions,
    })
}

/// Builds the ordered member set for one fan-in connection instance.
#[allow(clippy::too_many_arguments)]
fn expand_fan_in(
    artifact_path: &str,
    source: &ProducerSpec,
    consumer: &ProducerSpec,
    order_by: Option<&[String]>,
    slot: &str,
    collected: &[&str],
    consumer_dim_position: &FxHashMap<&str, usize>,
    consumer_indices: &[usize],
    counts: &LoopCountMap,
    consumer_id: &NodeId,
) -> Result<FanInDescriptor, GraphError> {
    // Member order iterates the collected dimensions, slowest-varying first.
    let order_dims: Vec<&str> = match order_by {
        None => collected.to_vec(),
        Some(declared) => {
            let declared: Vec<&str> = declared.iter().map(String::as_str).collect();
            let mut remaining: Vec<&str> = collected.to_vec();
            for dim in &declared {
                let Some(pos) = remaining.iter().position(|d| d == dim) else {
                    return Err(GraphError::InvalidFanIn {
                        consumer: consumer.path.clone(),
                        slot: slot.to_string(),
                        reason: format!(
                            "ordered_by dimension {dim:?} is not collected by this connection"
                        ),
                    });
                };
                remaining.remove(pos);
            }
            if !remaining.is_empty() {
                return Err(GraphError::InvalidFanIn {
                    consumer: consumer.path.clone(),
                    slot: slot.to_string(),
                    reason: format!("ordered_by omits collected dimensions {remaining:?}"),
                });
            }
            declared
        }
    };

    let order_counts: Vec<usize> = order_dims
        .iter()
        .map(|d| {
            counts
                .get(*d)
                .copied()
                .ok_or_else(|| GraphError::MissingLoopCount {
                    name: (*d).to_string(),
                })
        })
        .collect::<Result<_, _>>()?;

    let mut members = Vec::new();
    for (order, combo) in index_vectors(&order_counts).into_iter().enumerate() {
        let combo_for: FxHashMap<&str, usize> = order_dims
            .iter()
            .copied()
            .zip(combo.iter().copied())
            .collect();
        let src_indices: Vec<usize> = source
            .dimensions
            .iter()
            .map(|d| match consumer_dim_position.get(d.as_str()) {
                Some(pos) => consumer_indices[*pos],
                None => combo_for[d.as_str()],
            })
            .collect();
        members.push(FanInMember {
            id: NodeId::artifact(artifact_path).indexed(src_indices),
            order,
        });
    }

    Ok(FanInDescriptor {
        key: fan_in_key(consumer_id, slot),
        members,
    })
}

/// Cartesian index product: `[2, 2]` → `[0,0] [0,1] [1,0] [1,1]`.
///
/// No dimensions yields one empty vector (a single unlooped instance); any
/// zero count yields no vectors at all.
fn index_vectors(counts: &[usize]) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::new()];
    for &count in counts {
        let mut next = Vec::with_capacity(out.len().saturating_mul(count));
        for prefix in &out {
            for i in 0..count {
                let mut v = prefix.clone();
                v.push(i);
                next.push(v);
            }
        }
        out = next;
    }
    out
}
