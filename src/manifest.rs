//! Manifests: the folded, authoritative view of produced artifacts.
//!
//! A manifest is never edited directly. It is derived by replaying the
//! event log and keeping the last event per artifact, at plan time and
//! again after each completed layer (the running manifest). The planner
//! compares entries' recorded input hashes against freshly computed ones;
//! the runner resolves upstream blob references through entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::{ArtifactEvent, ArtifactStatus};
use crate::hashing::hash_json;
use crate::store::BlobRef;
use crate::types::{JobId, NodeId, Revision};

/// The recorded state of one artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Stored bytes, when the last event succeeded.
    #[serde(flatten)]
    pub blob: Option<BlobRef>,
    pub produced_by: JobId,
    pub inputs_hash: String,
    pub status: ArtifactStatus,
}

impl ManifestEntry {
    pub fn from_event(event: &ArtifactEvent) -> Self {
        Self {
            blob: event.output.clone(),
            produced_by: event.produced_by.clone(),
            inputs_hash: event.inputs_hash.clone(),
            status: event.status,
        }
    }
}

/// Artifact state as of one revision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub revision: Revision,
    artifacts: BTreeMap<NodeId, ManifestEntry>,
}

impl Manifest {
    pub fn empty(revision: Revision) -> Self {
        Self {
            revision,
            artifacts: BTreeMap::new(),
        }
    }

    /// Folds an event sequence, last event per artifact winning.
    pub fn fold(revision: Revision, events: &[ArtifactEvent]) -> Self {
        let mut manifest = Self::empty(revision);
        for event in events {
            manifest.apply(event);
        }
        manifest
    }

    /// Applies one more event on top of this view.
    pub fn apply(&mut self, event: &ArtifactEvent) {
        self.artifacts
            .insert(event.artifact_id.clone(), ManifestEntry::from_event(event));
    }

    pub fn insert_entry(&mut self, artifact: NodeId, entry: ManifestEntry) {
        self.artifacts.insert(artifact, entry);
    }

    pub fn artifact(&self, id: &NodeId) -> Option<&ManifestEntry> {
        self.artifacts.get(id)
    }

    pub fn artifacts(&self) -> impl Iterator<Item = (&NodeId, &ManifestEntry)> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Hash over the artifact table only, independent of the revision label.
    ///
    /// The encoding is built explicitly so the cache key cannot drift with
    /// serialization attributes: per artifact, the blob fields (when
    /// present), producing job, recorded input hash, and status.
    pub fn content_hash(&self) -> String {
        let mut table = serde_json::Map::new();
        for (id, entry) in &self.artifacts {
            let mut fields = serde_json::Map::new();
            if let Some(blob) = &entry.blob {
                fields.insert("hash".to_string(), blob.hash.clone().into());
                fields.insert("size".to_string(), blob.size.into());
                fields.insert("mimeType".to_string(), blob.mime_type.clone().into());
            }
            fields.insert(
                "producedBy".to_string(),
                entry.produced_by.as_str().into(),
            );
            fields.insert("inputsHash".to_string(), entry.inputs_hash.clone().into());
            fields.insert(
                "status".to_string(),
                match entry.status {
                    ArtifactStatus::Succeeded => "succeeded",
                    ArtifactStatus::Failed => "failed",
                }
                .into(),
            );
            table.insert(id.encode(), fields.into());
        }
        hash_json(&serde_json::Value::Object(table))
    }
}
