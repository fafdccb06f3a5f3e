//! Output schemas and condition field-path decomposition.
//!
//! A producer may declare the JSON shape of its output content as a
//! [`SchemaNode`] tree. Conditions reference fields inside that content with
//! dotted/bracketed paths (`segments[segment].needs_image`); decomposition
//! walks the path against the schema, verifying every hop and collecting the
//! loop dimensions crossed at array boundaries.
//!
//! Decomposition results are memoized in a [`SchemaCache`] owned by whoever
//! runs the expansion; there is no process-global cache, so tests get fresh
//! instances for free.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::GraphError;
use crate::hashing::hash_json;

/// The declared JSON shape of a producer's output content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaNode {
    /// An object with a fixed field set.
    Object(BTreeMap<String, SchemaNode>),
    /// A homogeneous array; hopping into it consumes one loop dimension.
    Array(Box<SchemaNode>),
    String,
    Number,
    Bool,
    /// Binary content (stored as blob references at rest).
    Binary,
}

impl SchemaNode {
    /// Builds an object schema from field/schema pairs.
    #[must_use]
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaNode)>,
    {
        SchemaNode::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds an array schema.
    #[must_use]
    pub fn array(element: SchemaNode) -> Self {
        SchemaNode::Array(Box::new(element))
    }
}

/// One hop of a parsed condition field path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldSegment {
    /// Descend into an object field.
    Field(String),
    /// Descend into an array element, iterating over the named loop
    /// dimension.
    Dimension(String),
}

/// A parsed dotted/bracketed field path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<FieldSegment>,
    raw: String,
}

impl FieldPath {
    /// Parse a path like `segments[segment].lines[line].text`.
    ///
    /// Grammar: field names are `[A-Za-z0-9_-]+`, joined by dots; each field
    /// may be followed by any number of `[dimension]` hops.
    pub fn parse(raw: &str) -> Result<Self, GraphError> {
        let invalid = |reason: &str| GraphError::InvalidFieldPath {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (name, mut brackets) = match part.find('[') {
                Some(pos) => part.split_at(pos),
                None => (part, ""),
            };
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid("field names are non-empty runs of [A-Za-z0-9_-]"));
            }
            segments.push(FieldSegment::Field(name.to_string()));
            while !brackets.is_empty() {
                let Some((dim, rest)) = brackets
                    .strip_prefix('[')
                    .and_then(|r| r.split_once(']'))
                else {
                    return Err(invalid("unbalanced brackets"));
                };
                if dim.is_empty() {
                    return Err(invalid("empty dimension name"));
                }
                segments.push(FieldSegment::Dimension(dim.to_string()));
                brackets = rest;
            }
        }

        Ok(Self {
            segments,
            raw: raw.to_string(),
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[FieldSegment] {
        &self.segments
    }

    /// The original path text, used in persisted condition tuples.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Memoized field-path decompositions, keyed by (schema content hash, path).
///
/// Owned by the expansion pass; never global.
#[derive(Default)]
pub struct SchemaCache {
    entries: FxHashMap<(String, String), Vec<String>>,
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decompose `path` against `schema`, returning the loop dimensions
    /// crossed in traversal order. `artifact` is only used for error context.
    pub fn decompose(
        &mut self,
        schema: &SchemaNode,
        path: &FieldPath,
        artifact: &str,
    ) -> Result<Vec<String>, GraphError> {
        let schema_hash = hash_json(&serde_json::to_value(schema).unwrap_or_default());
        let key = (schema_hash, path.raw().to_string());
        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.clone());
        }
        let dims = decompose_uncached(schema, path, artifact)?;
        self.entries.insert(key, dims.clone());
        Ok(dims)
    }
}

fn decompose_uncached(
    schema: &SchemaNode,
    path: &FieldPath,
    artifact: &str,
) -> Result<Vec<String>, GraphError> {
    let mut cursor = schema;
    let mut dimensions = Vec::new();

    for segment in path.segments() {
        match segment {
            FieldSegment::Field(name) => {
                let SchemaNode::Object(fields) = cursor else {
                    return Err(GraphError::ConditionFieldMissing {
                        artifact: artifact.to_string(),
                        field: path.raw().to_string(),
                        segment: name.clone(),
                    });
                };
                cursor = fields.get(name).ok_or_else(|| {
                    GraphError::ConditionFieldMissing {
                        artifact: artifact.to_string(),
                        field: path.raw().to_string(),
                        segment: name.clone(),
                    }
                })?;
            }
            FieldSegment::Dimension(dim) => {
                let SchemaNode::Array(element) = cursor else {
                    return Err(GraphError::ConditionFieldMissing {
                        artifact: artifact.to_string(),
                        field: path.raw().to_string(),
                        segment: format!("[{dim}]"),
                    });
                };
                dimensions.push(dim.clone());
                cursor = element;
            }
        }
    }

    Ok(dimensions)
}
