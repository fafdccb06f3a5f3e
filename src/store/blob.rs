//! Content-addressed blob persistence.
//!
//! One physical file per distinct SHA-256 hash, sharded by the first two hex
//! characters: `blobs/ab/abc123….mp3`. Writes go through a temp file and an
//! atomic rename, so a crash never leaves a partial blob under its final
//! name, and persisting bytes that already exist is a no-op.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::mime::{extension_for, mime_for_extension};
use super::StoreError;
use crate::hashing::sha256_hex;

/// A content-addressed pointer to stored bytes.
///
/// Many artifacts may share one ref; equality of `hash` means equality of
/// content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    /// Lowercase hex SHA-256 of the content.
    pub hash: String,
    pub size: u64,
    pub mime_type: String,
}

/// The `blobs/` directory of one project.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, hash: &str) -> PathBuf {
        // Hashes are 64 hex chars; two leading chars shard into 256 dirs.
        self.root.join(&hash[..2])
    }

    fn blob_path(&self, hash: &str, mime_type: &str) -> PathBuf {
        self.shard_dir(hash)
            .join(format!("{hash}.{}", extension_for(mime_type)))
    }

    /// Any existing file for this hash, regardless of extension.
    async fn find_existing(&self, hash: &str) -> Result<Option<PathBuf>, StoreError> {
        let dir = self.shard_dir(hash);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(hash) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Persists bytes, returning their ref. Idempotent per content hash.
    ///
    /// If any file for the hash already exists the write is skipped and the
    /// returned ref reflects the stored file's media type, keeping the one
    /// file per hash invariant even when callers disagree about the type.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn persist(&self, bytes: &[u8], mime_type: &str) -> Result<BlobRef, StoreError> {
        let hash = sha256_hex(bytes);

        if let Some(existing) = self.find_existing(&hash).await? {
            let stored_mime = existing
                .extension()
                .and_then(|e| e.to_str())
                .and_then(mime_for_extension)
                .unwrap_or(mime_type);
            debug!(%hash, "blob already stored, skipping write");
            return Ok(BlobRef {
                hash,
                size: bytes.len() as u64,
                mime_type: stored_mime.to_string(),
            });
        }

        let dir = self.shard_dir(&hash);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        let path = self.blob_path(&hash, mime_type);
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        debug!(%hash, path = %path.display(), "blob persisted");
        Ok(BlobRef {
            hash,
            size: bytes.len() as u64,
            mime_type: mime_type.to_string(),
        })
    }

    /// Reads a blob's bytes back.
    ///
    /// The expected path is derived from the ref's media type; if that file
    /// is missing the shard is scanned for the hash under any extension
    /// before giving up.
    pub async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>, StoreError> {
        let expected = self.blob_path(&blob.hash, &blob.mime_type);
        match tokio::fs::read(&expected).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&expected, e)),
        }

        if let Some(path) = self.find_existing(&blob.hash).await? {
            return tokio::fs::read(&path)
                .await
                .map_err(|e| StoreError::io(&path, e));
        }
        Err(StoreError::MissingBlob {
            hash: blob.hash.clone(),
        })
    }

    /// Whether bytes for this hash are already stored.
    pub async fn contains(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self.find_existing(hash).await?.is_some())
    }
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
    async fn persist_then_read_round_trips() {
        let (_dir, store) = store();
        let blob = store.persist(b"hello blob", "text/plain").await.unwrap();
        assert_eq!(blob.size, 10);
        assert_eq!(blob.mime_type, "text/plain");
        assert_eq!(store.read(&blob).await.unwrap(), b"hello blob");
    }

    #[tokio::test]
    async fn identical_bytes_share_one_file() {
        let (_dir, store) = store();
        let first = store.persist(b"dup", "text/plain").await.unwrap();
        let second = store.persist(b"dup", "text/plain").await.unwrap();
        assert_eq!(first, second);

        let shard = store.root().join(&first.hash[..2]);
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&shard).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_mime_keeps_the_stored_file() {
        let (_dir, store) = store();
        let first = store.persist(b"payload", "audio/mpeg").await.unwrap();
        let second = store.persist(b"payload", "text/plain").await.unwrap();
        // The second persist reports what is actually on disk.
        assert_eq!(second.mime_type, "audio/mpeg");
        assert_eq!(second.hash, first.hash);
        assert!(store.contains(&first.hash).await.unwrap());
    }

    #[tokio::test]
    async fn read_falls_back_to_a_shard_scan() {
        let (_dir, store) = store();
        let mut blob = store.persist(b"scan me", "audio/mpeg").await.unwrap();
        // A ref recorded with a different type still resolves.
        blob.mime_type = "text/plain".to_string();
        assert_eq!(store.read(&blob).await.unwrap(), b"scan me");
    }

    #[tokio::test]
    async fn missing_blob_is_reported_by_hash() {
        let (_dir, store) = store();
        let blob = BlobRef {
            hash: "0".repeat(64),
            size: 1,
            mime_type: "text/plain".to_string(),
        };
        let err = store.read(&blob).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingBlob { .. }));
    }

    #[tokio::test]
    async fn no_temp_files_survive_persist() {
        let (_dir, store) = store();
        let blob = store.persist(b"tidy", "text/plain").await.unwrap();
        let shard = store.root().join(&blob.hash[..2]);
        let mut entries = tokio::fs::read_dir(&shard).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            assert!(!name.to_string_lossy().ends_with(".tmp"));
        }
    }
}
