//! Topological layer assignment over dependency graphs.
//!
//! Assigns every node the smallest layer strictly greater than all of its
//! prerequisites' layers, so that each layer is a maximal parallel wave.
//! Generic over the id type: the planner layers [`JobId`](crate::types::JobId)
//! subgraphs, tools can layer [`NodeId`](crate::types::NodeId) graphs for
//! display.
//!
//! Pure and synchronous. Cycles are reported, not fatal here: members keep
//! layer 0 so a caller can still render the graph, and the planner refuses
//! to build a plan from a cyclic result.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};
use std::hash::Hash;

/// Layer assignment for one graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layering<T> {
    /// Node → layer index. Covers every node handed in.
    pub assignments: BTreeMap<T, usize>,
    /// Number of distinct layers (zero for an empty graph).
    pub layer_count: usize,
    /// True when at least one node sits on a dependency cycle.
    pub has_cycle: bool,
}

impl<T: Clone + Ord> Layering<T> {
    pub fn layer_of(&self, id: &T) -> Option<usize> {
        self.assignments.get(id).copied()
    }

    /// Groups nodes by layer, ascending, each layer sorted by id.
    pub fn layers(&self) -> Vec<Vec<T>> {
        let mut out = vec![Vec::new(); self.layer_count];
        for (id, layer) in &self.assignments {
            out[*layer].push(id.clone());
        }
        out
    }
}

/// Kahn's algorithm with late level reproposal.
///
/// The queue starts with all zero-indegree nodes at layer 0. Draining a node
/// proposes `layer + 1` to each successor, always overwriting the previous
/// proposal; a successor enters the queue only when its remaining indegree
/// hits zero. FIFO order keeps drained layers non-decreasing, so the last
/// proposal a node receives is also its largest, which makes the final
/// assignment the longest-prerequisite-path depth.
///
/// Edges whose endpoints are not in `nodes` are ignored; the planner uses
/// this to elide dependencies on jobs that are already materialized.
pub fn layer<T>(nodes: &[T], edges: &[(T, T)]) -> Layering<T>
where
    T: Clone + Eq + Hash + Ord,
{
    let known: FxHashSet<&T> = nodes.iter().collect();

    let mut indegree: FxHashMap<&T, usize> = nodes.iter().map(|n| (n, 0)).collect();
    let mut successors: FxHashMap<&T, Vec<&T>> = FxHashMap::default();
    for (from, to) in edges {
        if !known.contains(&from) || !known.contains(&to) {
            continue;
        }
        *indegree.entry(to).or_insert(0) += 1;
        successors.entry(from).or_default().push(to);
    }

    let mut proposed: FxHashMap<&T, usize> = FxHashMap::default();
    let mut queue: VecDeque<&T> = VecDeque::new();
    for node in nodes {
        if indegree[&node] == 0 {
            proposed.insert(node, 0);
            queue.push_back(node);
        }
    }

    let mut finalized: FxHashMap<&T, usize> = FxHashMap::default();
    while let Some(node) = queue.pop_front() {
        let level = proposed.get(&node).copied().unwrap_or(0);
        finalized.insert(node, level);
        for &succ in successors.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
            proposed.insert(succ, level + 1);
            let slot = indegree.get_mut(&succ);
            let remaining = slot.map_or(0, |d| {
                *d = d.saturating_sub(1);
                *d
            });
            if remaining == 0 {
                queue.push_back(succ);
            }
        }
    }

    // Anything never finalized sits on a cycle; park it at layer 0.
    let has_cycle = finalized.len() < nodes.len();
    let mut assignments = BTreeMap::new();
    let mut layer_count = 0;
    for node in nodes {
        let level = finalized.get(&node).copied().unwrap_or(0);
        layer_count = layer_count.max(level + 1);
        assignments.insert(node.clone(), level);
    }
    if nodes.is_empty() {
        layer_count = 0;
    }

    Layering {
        assignments,
        layer_count,
        has_cycle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn edge_list(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn chain_takes_one_layer_per_link() {
        let layering = layer(
            &ids(&["a", "b", "c"]),
            &edge_list(&[("a", "b"), ("b", "c")]),
        );
        assert!(!layering.has_cycle);
        assert_eq!(layering.layer_count, 3);
        assert_eq!(layering.layer_of(&"a".to_string()), Some(0));
        assert_eq!(layering.layer_of(&"b".to_string()), Some(1));
        assert_eq!(layering.layer_of(&"c".to_string()), Some(2));
    }

    #[test]
    fn diamond_joins_at_the_deepest_prerequisite() {
        let layering = layer(
            &ids(&["a", "b", "c", "d"]),
            &edge_list(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]),
        );
        assert_eq!(layering.layer_count, 3);
        assert_eq!(layering.layer_of(&"d".to_string()), Some(2));
    }

    #[test]
    fn uneven_predecessors_take_the_longest_path() {
        // a -> c and b -> c, with a -> b: c must land after b.
        let layering = layer(
            &ids(&["a", "b", "c"]),
            &edge_list(&[("a", "c"), ("a", "b"), ("b", "c")]),
        );
        assert_eq!(layering.layer_of(&"b".to_string()), Some(1));
        assert_eq!(layering.layer_of(&"c".to_string()), Some(2));
    }

    #[test]
    fn isolated_nodes_sit_at_layer_zero() {
        let layering = layer(&ids(&["a", "b"]), &[]);
        assert!(!layering.has_cycle);
        assert_eq!(layering.layer_count, 1);
        assert_eq!(layering.layer_of(&"b".to_string()), Some(0));
    }

    #[test]
    fn cycles_are_flagged_and_parked_at_zero() {
        let layering = layer(
            &ids(&["a", "b", "c"]),
            &edge_list(&[("a", "b"), ("b", "a"), ("a", "c")]),
        );
        assert!(layering.has_cycle);
        assert_eq!(layering.layer_of(&"a".to_string()), Some(0));
        assert_eq!(layering.layer_of(&"b".to_string()), Some(0));
        // c still receives no proposal since its only predecessor never drains.
        assert_eq!(layering.layer_of(&"c".to_string()), Some(0));
    }

    #[test]
    fn edges_to_unknown_nodes_are_ignored() {
        let layering = layer(&ids(&["a"]), &edge_list(&[("ghost", "a"), ("a", "ghost")]));
        assert!(!layering.has_cycle);
        assert_eq!(layering.layer_of(&"a".to_string()), Some(0));
    }

    #[test]
    fn duplicate_edges_do_not_inflate_layers() {
        let layering = layer(
            &ids(&["a", "b"]),
            &edge_list(&[("a", "b"), ("a", "b")]),
        );
        assert!(!layering.has_cycle);
        assert_eq!(layering.layer_of(&"b".to_string()), Some(1));
    }

    #[test]
    fn layers_groups_and_sorts() {
        let layering = layer(
            &ids(&["b", "a", "c"]),
            &edge_list(&[("a", "c"), ("b", "c")]),
        );
        assert_eq!(
            layering.layers(),
            vec![ids(&["a", "b"]), ids(&["c"])],
        );
    }

    #[test]
    fn empty_graph_has_no_layers() {
        let layering = layer::<String>(&[], &[]);
        assert_eq!(layering.layer_count, 0);
        assert!(!layering.has_cycle);
        assert!(layering.layers().is_empty());
    }
}
