//! Deep blob resolution over value trees, in both directions.
//!
//! Provider adapters want raw bytes; the event log wants content-addressed
//! refs. [`materialize`] turns every [`Value::Blob`] placeholder back into
//! bytes before invocation, [`externalize`] turns every [`Value::Bytes`]
//! buffer into a stored ref before persistence. Both collect the binary
//! leaves first, do the I/O in one batch, then rewrite the tree
//! synchronously, and neither ever recurses into a byte buffer as if it
//! were a container.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{BlobRef, BlobStore, StoreError};
use crate::hashing::sha256_hex;
use crate::value::Value;

const NESTED_MIME: &str = "application/octet-stream";

/// Replaces every blob placeholder with its stored bytes.
pub async fn materialize(store: &BlobStore, value: &Value) -> Result<Value, StoreError> {
    let mut refs: Vec<&BlobRef> = Vec::new();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    value.walk(&mut |v| {
        if let Value::Blob(blob) = v
            && seen.insert(blob.hash.as_str())
        {
            refs.push(blob);
        }
    });

    let mut fetched: FxHashMap<String, Vec<u8>> = FxHashMap::default();
    for blob in refs {
        let bytes = store.read(blob).await?;
        fetched.insert(blob.hash.clone(), bytes);
    }

    value.rewrite(&mut |v| match v {
        Value::Blob(blob) => Some(match fetched.get(&blob.hash) {
            Some(bytes) => Ok(Value::Bytes(bytes.clone())),
            None => Err(StoreError::MissingBlob {
                hash: blob.hash.clone(),
            }),
        }),
        _ => None,
    })
}

/// Replaces every raw byte buffer with a persisted blob ref.
///
/// A value that is itself one byte buffer stores under the declared
/// `mime_type`; buffers nested inside containers store as octet-stream.
pub async fn externalize(
    store: &BlobStore,
    value: &Value,
    mime_type: &str,
) -> Result<Value, StoreError> {
    if let Value::Bytes(bytes) = value {
        let blob = store.persist(bytes, mime_type).await?;
        return Ok(Value::Blob(blob));
    }

    let mut buffers: Vec<&Vec<u8>> = Vec::new();
    value.walk(&mut |v| {
        if let Value::Bytes(bytes) = v {
            buffers.push(bytes);
        }
    });

    let mut persisted: FxHashMap<String, BlobRef> = FxHashMap::default();
    for bytes in buffers {
        let hash = sha256_hex(bytes);
        if !persisted.contains_key(&hash) {
            let blob = store.persist(bytes, NESTED_MIME).await?;
            persisted.insert(hash, blob);
        }
    }

    value.rewrite(&mut |v| match v {
        Value::Bytes(bytes) => {
            let hash = sha256_hex(bytes);
            Some(match persisted.get(&hash) {
                Some(blob) => Ok(Value::Blob(blob.clone())),
                None => Err(StoreError::MissingBlob { hash }),
            })
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        (dir, store)
    }

    #[tokio::test]
    async fn round_trip_through_the_store() {
        let (_dir, store) = store();
        let original = Value::map([
            ("title", Value::from("clip")),
            (
                "tracks",
                Value::array([Value::from(b"audio-0".to_vec()), Value::from(b"audio-1".to_vec())]),
            ),
        ]);

        let externalized = externalize(&store, &original, "audio/mpeg").await.unwrap();
        let mut blob_count = 0;
        externalized.walk(&mut |v| {
            if matches!(v, Value::Blob(_)) {
                blob_count += 1;
            }
            assert!(!matches!(v, Value::Bytes(_)));
        });
        assert_eq!(blob_count, 2);

        let materialized = materialize(&store, &externalized).await.unwrap();
        assert_eq!(materialized, original);
    }

    #[tokio::test]
    async fn top_level_bytes_keep_their_declared_type() {
        let (_dir, store) = store();
        let value = Value::from(b"raw audio".to_vec());
        let externalized = externalize(&store, &value, "audio/wav").await.unwrap();
        match externalized {
            Value::Blob(blob) => assert_eq!(blob.mime_type, "audio/wav"),
            other => panic!("expected a blob, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_buffers_persist_once() {
        let (_dir, store) = store();
        let value = Value::array([
            Value::from(b"same".to_vec()),
            Value::from(b"same".to_vec()),
        ]);
        let externalized = externalize(&store, &value, "text/plain").await.unwrap();
        let mut hashes = Vec::new();
        externalized.walk(&mut |v| {
            if let Value::Blob(blob) = v {
                hashes.push(blob.hash.clone());
            }
        });
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], hashes[1]);
    }

    #[tokio::test]
    async fn missing_blob_surfaces_during_materialize() {
        let (_dir, store) = store();
        let value = Value::from(BlobRef {
            hash: "f".repeat(64),
            size: 1,
            mime_type: "text/plain".to_string(),
        });
        let err = materialize(&store, &value).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingBlob { .. }));
    }
}
