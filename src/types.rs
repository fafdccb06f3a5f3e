//! Core identifier types for the planloom engine.
//!
//! This module defines the canonical id grammar used throughout the system
//! to name graph vertices, jobs, and planning passes. These are the core
//! domain concepts every other module builds on.
//!
//! # Key Types
//!
//! - [`NodeKind`]: Distinguishes producer, artifact, and input vertices
//! - [`NodeId`]: A structurally-typed canonical id (`Producer:story.scene[2]`)
//! - [`JobId`]: The id of one executable job (derived from a producer node)
//! - [`Revision`]: Identifies one planning/execution pass
//!
//! # Canonical id grammar
//!
//! ```text
//! <kind> ":" <path> <indices>
//! kind    := "Producer" | "Artifact" | "Input"
//! path    := segment ("." segment)*        segment := [A-Za-z0-9_-]+
//! indices := ("[" digits "]")*             outermost loop dimension first
//! ```
//!
//! Ids are constructed through [`NodeId`] methods or parsed with
//! [`NodeId::parse`]; callers never synthesize raw strings, so an id in hand
//! is always well-formed.
//!
//! # Examples
//!
//! ```rust
//! use planloom::types::{NodeId, NodeKind};
//!
//! let producer = NodeId::producer("story.scenes.render").indexed([2, 0]);
//! assert_eq!(producer.encode(), "Producer:story.scenes.render[2][0]");
//!
//! let parsed = NodeId::parse("Artifact:story.scenes.render.image[2][0]").unwrap();
//! assert_eq!(parsed.kind(), NodeKind::Artifact);
//! assert_eq!(parsed.indices(), &[2, 0]);
//! ```

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Distinguishes the three vertex families of a canonical graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A unit of work; expands per loop iteration.
    Producer,
    /// A value written by exactly one producer iteration.
    Artifact,
    /// An externally supplied leaf value.
    Input,
}

impl NodeKind {
    fn prefix(self) -> &'static str {
        match self {
            NodeKind::Producer => "Producer",
            NodeKind::Artifact => "Artifact",
            NodeKind::Input => "Input",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Errors produced when parsing or constructing canonical ids.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The id is missing the `Kind:` prefix entirely.
    #[error("canonical id {id:?} has no kind prefix")]
    #[diagnostic(
        code(planloom::ids::missing_prefix),
        help("ids look like `Producer:path.to.node[0]`; the prefix before `:` is required")
    )]
    MissingPrefix { id: String },

    /// The prefix before `:` is not one of the three known kinds.
    #[error("unknown id kind {prefix:?} in {id:?}")]
    #[diagnostic(
        code(planloom::ids::unknown_prefix),
        help("valid kinds are Producer, Artifact, and Input")
    )]
    UnknownPrefix { prefix: String, id: String },

    /// The dotted path is empty or contains an empty/invalid segment.
    #[error("invalid path segment {segment:?} in {id:?}")]
    #[diagnostic(
        code(planloom::ids::invalid_segment),
        help("path segments are non-empty runs of [A-Za-z0-9_-], joined by dots")
    )]
    InvalidSegment { segment: String, id: String },

    /// A bracketed index is empty or not a base-10 integer.
    #[error("invalid loop index {raw:?} in {id:?}")]
    #[diagnostic(
        code(planloom::ids::invalid_index),
        help("loop indices are non-negative integers: `[0]`, `[12]`")
    )]
    InvalidIndex { raw: String, id: String },

    /// `Input:` ids never carry loop indices.
    #[error("input id {id:?} carries loop indices")]
    #[diagnostic(
        code(planloom::ids::indexed_input),
        help("inputs are scalar leaves; only producers and artifacts are loop-expanded")
    )]
    IndexedInput { id: String },
}

/// A structurally-typed canonical id naming one vertex of the expanded graph.
///
/// `NodeId` is the currency of the whole engine: canonical nodes, edges,
/// fan-in members, job inputs/outputs, manifest keys, and event records all
/// use it. Ids are immutable and cheap to clone.
///
/// # Examples
///
/// ```rust
/// use planloom::types::NodeId;
///
/// let base = NodeId::producer("story.scenes.render");
/// let iteration = base.indexed([1]);
/// assert_eq!(iteration.to_string(), "Producer:story.scenes.render[1]");
///
/// // Round-trips through the persisted string form.
/// let back = NodeId::parse(&iteration.encode()).unwrap();
/// assert_eq!(back, iteration);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId {
    kind: NodeKind,
    path: String,
    indices: Vec<usize>,
}

impl NodeId {
    /// Creates a `Producer:` id with no loop indices.
    #[must_use]
    pub fn producer(path: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Producer,
            path: path.into(),
            indices: Vec::new(),
        }
    }

    /// Creates an `Artifact:` id with no loop indices.
    #[must_use]
    pub fn artifact(path: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Artifact,
            path: path.into(),
            indices: Vec::new(),
        }
    }

    /// Creates an `Input:` id. Inputs are never indexed.
    #[must_use]
    pub fn input(path: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Input,
            path: path.into(),
            indices: Vec::new(),
        }
    }

    /// Returns a copy of this id carrying the given loop indices
    /// (outermost dimension first).
    #[must_use]
    pub fn indexed<I: IntoIterator<Item = usize>>(&self, indices: I) -> Self {
        Self {
            kind: self.kind,
            path: self.path.clone(),
            indices: indices.into_iter().collect(),
        }
    }

    /// The vertex family of this id.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The dotted namespace path, without kind prefix or indices.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Loop indices, outermost dimension first. Empty for unlooped nodes.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Returns `true` for `Producer:` ids.
    #[must_use]
    pub fn is_producer(&self) -> bool {
        self.kind == NodeKind::Producer
    }

    /// Returns `true` for `Artifact:` ids.
    #[must_use]
    pub fn is_artifact(&self) -> bool {
        self.kind == NodeKind::Artifact
    }

    /// Returns `true` for `Input:` ids.
    #[must_use]
    pub fn is_input(&self) -> bool {
        self.kind == NodeKind::Input
    }

    /// Returns this id with its indices stripped (the un-expanded base form).
    #[must_use]
    pub fn base(&self) -> Self {
        Self {
            kind: self.kind,
            path: self.path.clone(),
            indices: Vec::new(),
        }
    }

    /// Encode into the persisted string form, e.g. `Artifact:scene.image[2][0]`.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = format!("{}:{}", self.kind.prefix(), self.path);
        for idx in &self.indices {
            out.push('[');
            out.push_str(&idx.to_string());
            out.push(']');
        }
        out
    }

    /// Parse a persisted string form back into a validated id.
    ///
    /// Unlike loose decode-with-fallback schemes, parsing is strict: anything
    /// that does not match the grammar is an [`IdError`], never a silently
    /// coerced id.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let Some((prefix, rest)) = s.split_once(':') else {
            return Err(IdError::MissingPrefix { id: s.to_string() });
        };
        let kind = match prefix {
            "Producer" => NodeKind::Producer,
            "Artifact" => NodeKind::Artifact,
            "Input" => NodeKind::Input,
            other => {
                return Err(IdError::UnknownPrefix {
                    prefix: other.to_string(),
                    id: s.to_string(),
                });
            }
        };

        let (path_part, index_part) = match rest.find('[') {
            Some(pos) => rest.split_at(pos),
            None => (rest, ""),
        };

        if path_part.is_empty() {
            return Err(IdError::InvalidSegment {
                segment: String::new(),
                id: s.to_string(),
            });
        }
        for segment in path_part.split('.') {
            if segment.is_empty()
                || !segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(IdError::InvalidSegment {
                    segment: segment.to_string(),
                    id: s.to_string(),
                });
            }
        }

        let mut indices = Vec::new();
        let mut remainder = index_part;
        while !remainder.is_empty() {
            let inner = remainder
                .strip_prefix('[')
                .and_then(|r| r.split_once(']'))
                .ok_or_else(|| IdError::InvalidIndex {
                    raw: remainder.to_string(),
                    id: s.to_string(),
                })?;
            let (digits, rest) = inner;
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(IdError::InvalidIndex {
                    raw: digits.to_string(),
                    id: s.to_string(),
                });
            }
            indices.push(digits.parse::<usize>().map_err(|_| IdError::InvalidIndex {
                raw: digits.to_string(),
                id: s.to_string(),
            })?);
            remainder = rest;
        }

        if kind == NodeKind::Input && !indices.is_empty() {
            return Err(IdError::IndexedInput { id: s.to_string() });
        }

        Ok(Self {
            kind,
            path: path_part.to_string(),
            indices,
        })
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.encode()
    }
}

impl TryFrom<String> for NodeId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        NodeId::parse(&s)
    }
}

/// The id of one executable job.
///
/// A job id is derived from the producer node the job executes; it is opaque
/// to planner and runner, which only compare and sort it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Derive the job id for a producer node.
    #[must_use]
    pub fn of(producer: &NodeId) -> Self {
        JobId(producer.encode())
    }

    /// The encoded producer id this job executes.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one planning/execution pass over a project's blueprint.
///
/// Revisions are opaque strings; [`Revision::generate`] mints a fresh one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Wrap an externally chosen revision label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Revision(label.into())
    }

    /// Mint a fresh unique revision.
    #[must_use]
    pub fn generate() -> Self {
        Revision(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The revision label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Revision(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_chains_indices_outermost_first() {
        let id = NodeId::artifact("story.scenes.render.image").indexed([3, 1]);
        assert_eq!(id.encode(), "Artifact:story.scenes.render.image[3][1]");
    }

    #[test]
    fn parse_round_trips() {
        for raw in [
            "Producer:script",
            "Artifact:script.text",
            "Producer:story.scenes.render[2][0]",
            "Input:topic",
        ] {
            let id = NodeId::parse(raw).unwrap();
            assert_eq!(id.encode(), raw);
        }
    }

    #[test]
    fn parse_rejects_bad_forms() {
        assert!(matches!(
            NodeId::parse("script"),
            Err(IdError::MissingPrefix { .. })
        ));
        assert!(matches!(
            NodeId::parse("Widget:script"),
            Err(IdError::UnknownPrefix { .. })
        ));
        assert!(matches!(
            NodeId::parse("Producer:a..b"),
            Err(IdError::InvalidSegment { .. })
        ));
        assert!(matches!(
            NodeId::parse("Producer:a[x]"),
            Err(IdError::InvalidIndex { .. })
        ));
        assert!(matches!(
            NodeId::parse("Producer:a[1"),
            Err(IdError::InvalidIndex { .. })
        ));
        assert!(matches!(
            NodeId::parse("Input:topic[0]"),
            Err(IdError::IndexedInput { .. })
        ));
    }

    #[test]
    fn ids_order_by_kind_then_path_then_indices() {
        let a = NodeId::artifact("a");
        let p = NodeId::producer("a");
        let p1 = NodeId::producer("a").indexed([1]);
        assert!(p < a);
        assert!(p < p1);
    }
}
