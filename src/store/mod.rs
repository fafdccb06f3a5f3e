//! Project storage: blobs, the event log, and persisted runs.
//!
//! One directory per project:
//!
//! ```text
//! <storage root>/
//!   blobs/<hh>/<hash>.<ext>     content-addressed artifact bytes
//!   events/log.ndjson           append-only artifact event log
//!   runs/<revision>-plan.json   execution plans, of record once written
//!   runs/<revision>-manifest.json
//! ```
//!
//! [`ProjectStorage`] hands out the pieces; nothing here caches, so two
//! processes pointed at the same directory see each other's writes (subject
//! to the planner's manifest base hash check).

mod blob;
mod mime;
mod resolve;

pub use blob::{BlobRef, BlobStore};
pub use mime::{extension_for, mime_for_extension};
pub use resolve::{externalize, materialize};

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::events::FsEventLog;
use crate::manifest::Manifest;
use crate::planner::ExecutionPlan;
use crate::types::Revision;

/// Storage failures: filesystem trouble or unreadable persisted state.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("storage I/O failure at {path:?}")]
    #[diagnostic(
        code(planloom::store::io),
        help("check the storage directory exists and is writable")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no stored blob for hash {hash}")]
    #[diagnostic(
        code(planloom::store::missing_blob),
        help("the event log references bytes the blob directory no longer holds")
    )]
    MissingBlob { hash: String },

    #[error("could not encode {what} for {path:?}")]
    #[diagnostic(code(planloom::store::encode))]
    Encode {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not decode {what} from {path:?}")]
    #[diagnostic(
        code(planloom::store::decode),
        help("the file may have been written by an incompatible version or edited by hand")
    )]
    Decode {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no persisted {what} for revision {revision}")]
    #[diagnostic(code(planloom::store::missing_run))]
    MissingRun {
        what: &'static str,
        revision: Revision,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The storage layout of one project directory.
#[derive(Clone, Debug)]
pub struct ProjectStorage {
    root: PathBuf,
    blobs: BlobStore,
}

impl ProjectStorage {
    /// Binds to a project directory. No I/O happens until something is
    /// written; directories are created on demand.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let blobs = BlobStore::new(root.join("blobs"));
        Self { root, blobs }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// The project's append-only event log.
    pub fn event_log(&self) -> FsEventLog {
        FsEventLog::new(self.root.join("events").join("log.ndjson"))
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn plan_path(&self, revision: &Revision) -> PathBuf {
        self.runs_dir().join(format!("{revision}-plan.json"))
    }

    fn manifest_path(&self, revision: &Revision) -> PathBuf {
        self.runs_dir().join(format!("{revision}-manifest.json"))
    }

    /// Writes a JSON document under `runs/` via temp file and atomic rename.
    async fn write_run_file(
        &self,
        path: &Path,
        what: &'static str,
        json: Result<Vec<u8>, serde_json::Error>,
    ) -> Result<(), StoreError> {
        let bytes = json.map_err(|e| StoreError::Encode {
            what,
            path: path.to_path_buf(),
            source: e,
        })?;
        let dir = self.runs_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        Ok(())
    }

    /// Persists an execution plan as the record of what this revision will
    /// run.
    #[instrument(skip_all, fields(revision = %plan.revision), err)]
    pub async fn persist_plan(&self, plan: &ExecutionPlan) -> Result<PathBuf, StoreError> {
        let path = self.plan_path(&plan.revision);
        self.write_run_file(&path, "plan", serde_json::to_vec_pretty(plan))
            .await?;
        Ok(path)
    }

    pub async fn load_plan(&self, revision: &Revision) -> Result<ExecutionPlan, StoreError> {
        let path = self.plan_path(revision);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::MissingRun {
                    what: "plan",
                    revision: revision.clone(),
                });
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_slice(&raw).map_err(|e| StoreError::Decode {
            what: "plan",
            path,
            source: e,
        })
    }

    /// Persists the folded manifest alongside the revision's plan.
    #[instrument(skip_all, fields(revision = %manifest.revision), err)]
    pub async fn persist_manifest(&self, manifest: &Manifest) -> Result<PathBuf, StoreError> {
        let path = self.manifest_path(&manifest.revision);
        self.write_run_file(&path, "manifest", serde_json::to_vec_pretty(manifest))
            .await?;
        Ok(path)
    }

    /// Loads a persisted manifest, `None` when the revision never wrote one.
    pub async fn load_manifest(
        &self,
        revision: &Revision,
    ) -> Result<Option<Manifest>, StoreError> {
        let path = self.manifest_path(revision);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StoreError::Decode {
                what: "manifest",
                path,
                source: e,
            })
    }

    /// Revisions with a persisted plan, sorted by label.
    pub async fn list_runs(&self) -> Result<Vec<Revision>, StoreError> {
        let dir = self.runs_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut revisions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(revision) = name.strip_suffix("-plan.json") {
                revisions.push(Revision::from(revision));
            }
        }
        revisions.sort();
        Ok(revisions)
    }
}
