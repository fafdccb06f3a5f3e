//! Blueprint documents and their expansion into canonical graphs.
//!
//! A blueprint describes a project declaratively: producers, the artifacts
//! they write, the inputs and upstream artifacts they consume, loop
//! dimensions, and conditions gating connections. This module turns that
//! document into the flat, concrete [`CanonicalBlueprint`] every later stage
//! (assembly, layering, planning, execution) operates on.
//!
//! # Pipeline position
//!
//! ```text
//! Blueprint ──expand──▶ CanonicalBlueprint ──assemble──▶ JobGraph ──layer/plan/run──▶ …
//! ```
//!
//! Expansion is a pure function of `(document, loop counts)`: no I/O, fully
//! deterministic, all cross-reference validation up front.
//!
//! # Quick start
//!
//! ```rust
//! use planloom::blueprint::{expand, Blueprint, LoopCount, ProducerSpec, SourceRef};
//! use std::collections::BTreeMap;
//!
//! let bp = Blueprint::builder("demo")
//!     .add_input("topic")
//!     .add_loop("segment", LoopCount::Fixed(2))
//!     .add_producer(
//!         ProducerSpec::new("script", "script-writer")
//!             .output("text")
//!             .consume("topic", SourceRef::input("topic")),
//!     )
//!     .add_producer(
//!         ProducerSpec::new("narrate", "narrator")
//!             .in_loop("segment")
//!             .output("audio")
//!             .consume("script", SourceRef::artifact("script.text")),
//!     )
//!     .build();
//!
//! let counts = BTreeMap::from([("segment".to_string(), 2)]);
//! let canonical = expand(&bp, &counts).unwrap();
//! // script, script.text, narrate[0..2], narrate.audio[0..2], topic
//! assert_eq!(canonical.nodes.len(), 7);
//! ```

use miette::Diagnostic;
use thiserror::Error;

mod canonical;
mod document;
pub mod expand;
mod schema;

pub use canonical::{
    CanonicalBlueprint, CanonicalEdge, CanonicalNode, ConditionSpec, FanInDescriptor, FanInMember,
    InputBinding, fan_in_key,
};
pub use document::{
    Blueprint, BlueprintBuilder, ConditionDef, ConditionOperator, ConditionRef, ConnectionSpec,
    InputSpec, LoopCount, LoopSpec, ProducerSpec, SourceRef,
};
pub use expand::{LoopCountMap, expand, resolve_loop_counts};
pub use schema::{FieldPath, FieldSegment, SchemaCache, SchemaNode};

/// Structural defects in a blueprint, raised during expansion and always
/// before layering or planning sees the graph.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq)]
pub enum GraphError {
    /// An artifact reference points at a producer that is not declared.
    #[error("no producer found for artifact path {path:?}")]
    #[diagnostic(
        code(planloom::graph::producer_not_found),
        help("artifact paths are `{{producer path}}.{{output name}}`; declare the producer first")
    )]
    ProducerNotFound { path: String },

    /// A connection references an input that is not declared.
    #[error("producer {consumer:?} consumes undeclared input {name:?}")]
    #[diagnostic(
        code(planloom::graph::input_not_found),
        help("declare the input with `add_input` before wiring it")
    )]
    InputNotFound { name: String, consumer: String },

    /// A connection target exists but cannot be wired as requested.
    #[error("invalid connection target {source:?} for producer {consumer:?}: {reason}")]
    #[diagnostic(code(planloom::graph::invalid_connection_target))]
    InvalidConnectionTarget {
        // `r#` opts out of thiserror's `source()` inference; same identifier as `source`.
        r#source: String,
        consumer: String,
        reason: String,
    },

    /// Two producers share one namespace path.
    #[error("duplicate producer path {path:?}")]
    #[diagnostic(
        code(planloom::graph::duplicate_producer),
        help("producer paths must be unique within a blueprint")
    )]
    DuplicateProducer { path: String },

    /// Two outputs resolve to one artifact path.
    #[error("duplicate artifact path {path:?}")]
    #[diagnostic(code(planloom::graph::duplicate_artifact))]
    DuplicateArtifact { path: String },

    /// A dimension or condition references an undeclared loop.
    #[error("unknown loop {name:?} referenced by {referenced_by}")]
    #[diagnostic(
        code(planloom::graph::unknown_loop),
        help("declare the loop with `add_loop` before referencing it")
    )]
    UnknownLoop { name: String, referenced_by: String },

    /// A producer lists the same loop dimension twice.
    #[error("producer {producer:?} repeats loop dimension {dimension:?}")]
    #[diagnostic(code(planloom::graph::duplicate_dimension))]
    DuplicateDimension { producer: String, dimension: String },

    /// Two connections on one producer bind the same slot.
    #[error("producer {producer:?} binds slot {slot:?} more than once")]
    #[diagnostic(
        code(planloom::graph::duplicate_slot),
        help("each consumed slot takes exactly one connection; use fan-in for collections")
    )]
    DuplicateSlot { producer: String, slot: String },

    /// No count was supplied for a loop.
    #[error("no iteration count resolved for loop {name:?}")]
    #[diagnostic(
        code(planloom::graph::missing_loop_count),
        help("fixed loops carry their count; from-input loops need the input bound at plan time")
    )]
    MissingLoopCount { name: String },

    /// The value backing a from-input loop count is unusable.
    #[error("loop {name:?} count is invalid: {reason}")]
    #[diagnostic(code(planloom::graph::invalid_loop_count))]
    InvalidLoopCount { name: String, reason: String },

    /// A connection names a condition the blueprint does not declare.
    #[error("producer {consumer:?} references unknown condition {name:?}")]
    #[diagnostic(
        code(planloom::graph::unknown_condition),
        help("declare the condition with `add_condition` or inline it on the connection")
    )]
    UnknownCondition { name: String, consumer: String },

    /// A condition inspects an artifact whose producer declares no schema.
    #[error("producer {producer:?} declares no output schema, but a condition inspects its content")]
    #[diagnostic(
        code(planloom::graph::missing_output_schema),
        help("add `with_output_schema` to the producer so field paths can be decomposed")
    )]
    MissingOutputSchema { producer: String },

    /// A condition field path does not parse.
    #[error("invalid condition field path {raw:?}: {reason}")]
    #[diagnostic(code(planloom::graph::invalid_field_path))]
    InvalidFieldPath { raw: String, reason: String },

    /// A condition field path walks off the declared schema.
    #[error("field path {field:?} does not exist in {artifact:?} (at segment {segment:?})")]
    #[diagnostic(
        code(planloom::graph::condition_field_missing),
        help("the path must follow the producer's declared output schema")
    )]
    ConditionFieldMissing {
        artifact: String,
        field: String,
        segment: String,
    },

    /// A fan-in connection is declared inconsistently.
    #[error("invalid fan-in for {consumer:?} slot {slot:?}: {reason}")]
    #[diagnostic(
        code(planloom::graph::invalid_fan_in),
        help("`ordered_by` must list exactly the collected dimensions, each once")
    )]
    InvalidFanIn {
        consumer: String,
        slot: String,
        reason: String,
    },
}
