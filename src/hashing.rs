//! SHA-256 content hashing over canonical encodings.
//!
//! All cache keys in the engine (blob addresses, artifact content hashes,
//! job input hashes, the manifest base hash) are lowercase hex SHA-256
//! digests. Structured data is hashed through its canonical JSON text:
//! `serde_json` keeps object keys sorted (the crate is built without
//! `preserve_order`), so serializing a [`Value`](crate::value::Value) tree
//! yields a stable byte sequence for identical content.

use sha2::{Digest, Sha256};

use crate::value::Value;

/// Lowercase hex SHA-256 of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Canonical JSON text of an already-JSON-shaped value.
#[must_use]
pub fn canonical_json(json: &serde_json::Value) -> String {
    serde_json::to_string(json).unwrap_or_default()
}

/// Hash of a JSON value's canonical text.
#[must_use]
pub fn hash_json(json: &serde_json::Value) -> String {
    sha256_hex(canonical_json(json).as_bytes())
}

/// Hash of a [`Value`] tree's canonical text.
///
/// Binary buffers participate through their base64 form, blob references
/// through their recorded hash, so a value that has been externalized to the
/// blob store and one still holding the same raw bytes hash differently.
/// Callers compare like forms with like.
#[must_use]
pub fn hash_value(value: &Value) -> String {
    hash_json(&value.to_json())
}
