//! Closed value tree for artifact payloads and input bindings.
//!
//! Everything that flows through the engine as data (input values, producer
//! settings, artifact payloads before/after blob externalization) is a
//! [`Value`]. The type is a closed sum: there is no open "extras" map and no
//! dynamic typing at the seams, so every consumer shares one validated shape.
//!
//! Two variants need special care during traversal:
//!
//! - [`Value::Bytes`] is a binary buffer and must never be misread as a
//!   container to recurse into;
//! - [`Value::Blob`] is a content-addressed placeholder ([`BlobRef`]) standing
//!   in for bytes that live in the blob store.
//!
//! Deep rewriting (blob resolution in both directions, canonicalization) goes
//! through one generic pre-order fold, [`Value::rewrite`], parameterized by a
//! leaf transformer. Other modules do not hand-roll recursion over values.
//!
//! # Persisted form
//!
//! Values serialize as plain JSON with two reserved single-key objects:
//! `{"$bytes": "<base64>"}` for binary buffers and `{"$blob": {…}}` for blob
//! references. Maps that happen to contain those keys with non-conforming
//! payloads round-trip unchanged.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::store::BlobRef;

const BYTES_KEY: &str = "$bytes";
const BLOB_KEY: &str = "$blob";

/// A JSON-like value extended with binary buffers and blob references.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// Raw binary payload held in memory.
    Bytes(Vec<u8>),
    /// Content-addressed stand-in for bytes persisted in the blob store.
    Blob(BlobRef),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a map value from key/value pairs.
    #[must_use]
    pub fn map<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds an array value.
    #[must_use]
    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Array(items.into_iter().collect())
    }

    /// Pre-order rewrite with a leaf transformer.
    ///
    /// `f` sees every node before its children. Returning `Some(replacement)`
    /// substitutes the node without descending further; returning `None`
    /// recurses into arrays and maps and clones scalars as-is. Errors abort
    /// the whole rewrite.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use planloom::value::Value;
    ///
    /// let v = Value::array([Value::from(1i64), Value::from("x")]);
    /// let doubled = v
    ///     .rewrite(&mut |node| match node {
    ///         Value::Number(n) => n
    ///             .as_i64()
    ///             .map(|i| Ok::<_, std::convert::Infallible>(Value::from(i * 2))),
    ///         _ => None,
    ///     })
    ///     .unwrap();
    /// assert_eq!(doubled, Value::array([Value::from(2i64), Value::from("x")]));
    /// ```
    pub fn rewrite<E>(
        &self,
        f: &mut impl FnMut(&Value) -> Option<Result<Value, E>>,
    ) -> Result<Value, E> {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        Ok(match self {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.rewrite(f)?);
                }
                Value::Array(out)
            }
            Value::Map(entries) => {
                let mut out = BTreeMap::new();
                for (key, item) in entries {
                    out.insert(key.clone(), item.rewrite(f)?);
                }
                Value::Map(out)
            }
            scalar => scalar.clone(),
        })
    }

    /// Pre-order visit of every node, containers included.
    ///
    /// The visitor borrows from `self`, so collecting references out of the
    /// walk is fine.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Value)) {
        f(self);
        match self {
            Value::Array(items) => {
                for item in items {
                    item.walk(f);
                }
            }
            Value::Map(entries) => {
                for item in entries.values() {
                    item.walk(f);
                }
            }
            _ => {}
        }
    }

    /// Converts to the persisted JSON form.
    ///
    /// `serde_json`'s map type keeps keys sorted, so the output doubles as
    /// the canonical encoding used for hashing.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(bytes) => serde_json::json!({ BYTES_KEY: BASE64.encode(bytes) }),
            Value::Blob(blob) => serde_json::json!({
                BLOB_KEY: {
                    "hash": &blob.hash,
                    "size": blob.size,
                    "mimeType": &blob.mime_type,
                }
            }),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Converts from the persisted JSON form, recognizing the reserved
    /// `$bytes` / `$blob` single-key objects. Non-conforming payloads under
    /// those keys stay plain maps.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.clone()),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(serde_json::Value::String(encoded)) = obj.get(BYTES_KEY)
                        && let Ok(bytes) = BASE64.decode(encoded)
                    {
                        return Value::Bytes(bytes);
                    }
                    if let Some(inner) = obj.get(BLOB_KEY)
                        && let Ok(blob) = serde_json::from_value::<BlobRef>(inner.clone())
                    {
                        return Value::Blob(blob);
                    }
                }
                Value::Map(
                    obj.iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect(),
                )
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<BlobRef> for Value {
    fn from(blob: BlobRef) -> Self {
        Value::Blob(blob)
    }
}

/// External inputs supplied at plan time, keyed by input name.
///
/// Ordered so the same bindings always serialize and hash identically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputValues(BTreeMap<String, Value>);

impl InputValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent insert, for building bindings inline.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for InputValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
