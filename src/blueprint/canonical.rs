//! The flat canonical graph produced by blueprint expansion.
//!
//! Every looped/conditional construct of the document form is gone here:
//! nodes are concrete (`Producer:story.scenes.render[2]`), edges connect
//! concrete endpoints, fan-in groups list their concrete ordered members,
//! and conditions are fully expanded predicate tuples. This is the sole
//! input of the assembler.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::document::ConditionOperator;
use crate::types::NodeId;
use crate::value::Value;

/// One vertex of the canonical graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalNode {
    pub id: NodeId,
    /// Catalog alias for producer nodes; `None` for artifacts and inputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// A fully expanded condition predicate.
///
/// `dimensions` are the loop dimensions the field path crosses inside the
/// artifact content, in traversal order. The consumer evaluates the field
/// at its own indices along those dimensions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSpec {
    /// Base (unindexed) id of the artifact whose content is tested.
    pub artifact: NodeId,
    /// Original dotted/bracketed field path text.
    pub field_path: String,
    pub operator: ConditionOperator,
    pub expected_values: Vec<Value>,
    pub dimensions: Vec<String>,
}

/// One directed dependency between concrete nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// Consumer slot name for edges targeting a producer; `None` on
    /// producer → artifact output edges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionSpec>,
    /// Loop indices of the consuming side this edge instance belongs to.
    pub indices: Vec<usize>,
}

/// One ordered member of a fan-in group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FanInMember {
    pub id: NodeId,
    pub order: usize,
}

/// Aggregation of multiple loop-iteration artifacts into one consumer slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FanInDescriptor {
    /// `{consumer producer id}#{slot}`; see [`fan_in_key`].
    pub key: String,
    pub members: Vec<FanInMember>,
}

/// A blueprint input wired into one producer instance's slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    pub input: NodeId,
    pub consumer: NodeId,
    pub slot: String,
}

/// Key under which a fan-in descriptor is registered.
#[must_use]
pub fn fan_in_key(consumer: &NodeId, slot: &str) -> String {
    format!("{consumer}#{slot}")
}

/// The expanded, concrete graph: pure data, deterministic for a given
/// (document, loop counts) pair.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CanonicalBlueprint {
    pub nodes: Vec<CanonicalNode>,
    pub edges: Vec<CanonicalEdge>,
    /// Fan-in descriptors keyed by [`fan_in_key`].
    pub fan_in: FxHashMap<String, FanInDescriptor>,
    pub input_bindings: Vec<InputBinding>,
}

impl CanonicalBlueprint {
    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&CanonicalNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// All producer nodes in deterministic declaration/expansion order.
    pub fn producers(&self) -> impl Iterator<Item = &CanonicalNode> {
        self.nodes.iter().filter(|n| n.id.is_producer())
    }

    /// Fan-in descriptor for a consumer slot, if the slot aggregates.
    #[must_use]
    pub fn fan_in_for(&self, consumer: &NodeId, slot: &str) -> Option<&FanInDescriptor> {
        self.fan_in.get(&fan_in_key(consumer, slot))
    }

    /// Edges targeting the given node.
    pub fn edges_into<'a>(&'a self, to: &'a NodeId) -> impl Iterator<Item = &'a CanonicalEdge> {
        self.edges.iter().filter(move |e| &e.to == to)
    }

    /// Edges leaving the given node.
    pub fn edges_from<'a>(&'a self, from: &'a NodeId) -> impl Iterator<Item = &'a CanonicalEdge> {
        self.edges.iter().filter(move |e| &e.from == from)
    }
}
