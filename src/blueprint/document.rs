//! Declarative blueprint documents and their fluent builder.
//!
//! A [`Blueprint`] is the in-memory form of a project description: named
//! inputs, loop dimensions, producers with their output artifacts and
//! consumed connections, and reusable named conditions. Front-ends (a YAML
//! loader, a test fixture) construct it through [`BlueprintBuilder`]; the
//! engine never reads blueprint files itself.
//!
//! Declarations are not validated at build time. A builder is a bag of
//! statements, and all cross-reference checking happens in one place
//! when the document is expanded into a canonical graph
//! (see [`expand`](crate::blueprint::expand)).

use serde::{Deserialize, Serialize};

use super::schema::SchemaNode;
use crate::value::Value;

/// One externally supplied leaf value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
}

/// How a loop's iteration count is determined at planning time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopCount {
    /// The count is part of the document itself.
    Fixed(usize),
    /// The count is read from the named input's value when planning.
    FromInput(String),
}

/// A named loop dimension producers can expand over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub name: String,
    pub count: LoopCount,
}

/// Where a connection draws its value from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    /// A declared blueprint input, by name.
    Input(String),
    /// Another producer's output artifact, by dotted artifact path
    /// (`{producer path}.{output name}`).
    Artifact(String),
}

impl SourceRef {
    /// Reference a declared input.
    #[must_use]
    pub fn input(name: impl Into<String>) -> Self {
        SourceRef::Input(name.into())
    }

    /// Reference another producer's output artifact.
    #[must_use]
    pub fn artifact(path: impl Into<String>) -> Self {
        SourceRef::Artifact(path.into())
    }
}

/// Comparison applied between a field's value and the expected values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    NotEq,
    In,
    NotIn,
}

/// The body of a condition: which artifact field to test, how, against what.
///
/// `field` is a dotted path into the artifact's JSON content; array hops name
/// the loop dimension they traverse with brackets, e.g.
/// `segments[segment].needs_image`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionDef {
    pub artifact: String,
    pub field: String,
    pub operator: ConditionOperator,
    pub expected: Vec<Value>,
}

impl ConditionDef {
    #[must_use]
    pub fn new(
        artifact: impl Into<String>,
        field: impl Into<String>,
        operator: ConditionOperator,
        expected: impl IntoIterator<Item = Value>,
    ) -> Self {
        Self {
            artifact: artifact.into(),
            field: field.into(),
            operator,
            expected: expected.into_iter().collect(),
        }
    }
}

/// A condition attached to a connection: either a reference to a named
/// condition declared on the blueprint, or an inline one-off definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionRef {
    Named(String),
    Inline(ConditionDef),
}

/// One consumed value of a producer: a named slot wired to a source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub slot: String,
    pub source: SourceRef,
    /// Optional predicate gating this connection at execution time.
    pub condition: Option<ConditionRef>,
    /// For fan-in connections: permutation of the collected loop dimensions
    /// controlling member order (slowest-varying first). Defaults to the
    /// producing side's dimension declaration order.
    pub order_by: Option<Vec<String>>,
}

impl ConnectionSpec {
    #[must_use]
    pub fn new(slot: impl Into<String>, source: SourceRef) -> Self {
        Self {
            slot: slot.into(),
            source,
            condition: None,
            order_by: None,
        }
    }

    /// Gate this connection on a named condition.
    #[must_use]
    pub fn when_named(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(ConditionRef::Named(condition.into()));
        self
    }

    /// Gate this connection on an inline condition.
    #[must_use]
    pub fn when(mut self, condition: ConditionDef) -> Self {
        self.condition = Some(ConditionRef::Inline(condition));
        self
    }

    /// Order fan-in members by the given dimension permutation.
    #[must_use]
    pub fn ordered_by<S: Into<String>, I: IntoIterator<Item = S>>(mut self, dims: I) -> Self {
        self.order_by = Some(dims.into_iter().map(Into::into).collect());
        self
    }
}

/// One producer declaration: a unit of work, its loop dimensions, the
/// artifacts it writes, and the connections it consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProducerSpec {
    /// Dotted namespace path, unique within the blueprint.
    pub path: String,
    /// Catalog alias resolved to a provider/model during assembly.
    pub alias: String,
    /// Loop dimensions this producer expands over, outermost first.
    pub dimensions: Vec<String>,
    /// Output artifact names, each becoming `{path}.{name}`.
    pub outputs: Vec<String>,
    pub connections: Vec<ConnectionSpec>,
    /// Declared JSON shape of this producer's output; required when any
    /// condition inspects one of its artifacts.
    pub output_schema: Option<SchemaNode>,
}

impl ProducerSpec {
    #[must_use]
    pub fn new(path: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            alias: alias.into(),
            dimensions: Vec::new(),
            outputs: Vec::new(),
            connections: Vec::new(),
            output_schema: None,
        }
    }

    /// Expand this producer over a declared loop dimension. Call order
    /// defines nesting: first call is the outermost dimension.
    #[must_use]
    pub fn in_loop(mut self, dimension: impl Into<String>) -> Self {
        self.dimensions.push(dimension.into());
        self
    }

    /// Declare an output artifact named `{path}.{name}`.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    /// Wire a slot to a source with no condition.
    #[must_use]
    pub fn consume(self, slot: impl Into<String>, source: SourceRef) -> Self {
        self.connect(ConnectionSpec::new(slot, source))
    }

    /// Wire a fully specified connection.
    #[must_use]
    pub fn connect(mut self, connection: ConnectionSpec) -> Self {
        self.connections.push(connection);
        self
    }

    /// Declare the JSON shape of this producer's output content.
    #[must_use]
    pub fn with_output_schema(mut self, schema: SchemaNode) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// A complete blueprint document.
///
/// Construct through [`Blueprint::builder`]; see
/// [`expand`](crate::blueprint::expand::expand) for turning a document plus
/// loop counts into a flat canonical graph.
///
/// # Examples
///
/// ```rust
/// use planloom::blueprint::{Blueprint, LoopCount, ProducerSpec, SourceRef};
///
/// let bp = Blueprint::builder("shorts")
///     .add_input("topic")
///     .add_loop("segment", LoopCount::Fixed(3))
///     .add_producer(
///         ProducerSpec::new("script", "script-writer")
///             .output("text")
///             .consume("topic", SourceRef::input("topic")),
///     )
///     .add_producer(
///         ProducerSpec::new("narrate", "narrator")
///             .in_loop("segment")
///             .output("audio")
///             .consume("script", SourceRef::artifact("script.text")),
///     )
///     .build();
/// assert_eq!(bp.producers().len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    name: String,
    inputs: Vec<InputSpec>,
    loops: Vec<LoopSpec>,
    producers: Vec<ProducerSpec>,
    conditions: Vec<(String, ConditionDef)>,
}

impl Blueprint {
    /// Start building a blueprint with the given project name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> BlueprintBuilder {
        BlueprintBuilder {
            name: name.into(),
            inputs: Vec::new(),
            loops: Vec::new(),
            producers: Vec::new(),
            conditions: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    #[must_use]
    pub fn loops(&self) -> &[LoopSpec] {
        &self.loops
    }

    #[must_use]
    pub fn producers(&self) -> &[ProducerSpec] {
        &self.producers
    }

    /// Named conditions in declaration order.
    #[must_use]
    pub fn conditions(&self) -> &[(String, ConditionDef)] {
        &self.conditions
    }
}

/// Fluent builder for [`Blueprint`] documents.
///
/// All methods are order-independent except that producer declaration order
/// fixes the deterministic node ordering of the expanded graph.
pub struct BlueprintBuilder {
    name: String,
    inputs: Vec<InputSpec>,
    loops: Vec<LoopSpec>,
    producers: Vec<ProducerSpec>,
    conditions: Vec<(String, ConditionDef)>,
}

impl BlueprintBuilder {
    /// Declare an input leaf.
    #[must_use]
    pub fn add_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(InputSpec { name: name.into() });
        self
    }

    /// Declare a loop dimension.
    #[must_use]
    pub fn add_loop(mut self, name: impl Into<String>, count: LoopCount) -> Self {
        self.loops.push(LoopSpec {
            name: name.into(),
            count,
        });
        self
    }

    /// Declare a producer.
    #[must_use]
    pub fn add_producer(mut self, producer: ProducerSpec) -> Self {
        self.producers.push(producer);
        self
    }

    /// Declare a reusable named condition.
    #[must_use]
    pub fn add_condition(mut self, name: impl Into<String>, condition: ConditionDef) -> Self {
        self.conditions.push((name.into(), condition));
        self
    }

    /// Finish building. No validation happens here; expansion validates.
    #[must_use]
    pub fn build(self) -> Blueprint {
        Blueprint {
            name: self.name,
            inputs: self.inputs,
            loops: self.loops,
            producers: self.producers,
            conditions: self.conditions,
        }
    }
}
