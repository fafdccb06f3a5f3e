//! Failure-recovery prepass.
//!
//! Some providers fail a job after the work was already accepted: the
//! request timed out locally but kept running remotely. Such failures are
//! recorded with `recoverable: true` and the provider's request id. Before
//! dirty evaluation, the planner asks an injected [`RecoveryClient`] whether
//! any of those requests has since completed; a completed one is downloaded,
//! persisted, and recorded as a fresh `succeeded` event so the dirty pass
//! finds the artifact clean and leaves the job out of the plan.
//!
//! Malformed diagnostics (a recoverable failure with no request id) never
//! reach the status check. They land in
//! [`RecoverySummary::failed_recoveries`] and the job stays dirty: silently
//! recovering on ambiguous provider state would break the at-most-once
//! production guarantee.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::PlanError;
use crate::events::{ArtifactEvent, ArtifactStatus, EventLog};
use crate::manifest::Manifest;
use crate::store::BlobStore;
use crate::types::{NodeId, Revision};

/// What the provider reports for a previously accepted request.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderStatus {
    /// The work finished; output is retrievable at the given URLs.
    Completed { urls: Vec<String> },
    /// Still running; re-polling later may recover it.
    InProgress,
    /// The provider gave up on the request.
    Failed { reason: String },
}

/// Bytes fetched back from a provider's output URL.
#[derive(Clone, Debug)]
pub struct DownloadedBinary {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Recovery interaction failures. Never fatal: each is downgraded to a
/// [`FailedRecovery`] entry and the affected job stays in the plan.
#[derive(Debug, Error, Diagnostic)]
pub enum RecoveryError {
    #[error("provider status check failed for request {request_id}: {message}")]
    #[diagnostic(
        code(planloom::recovery::status_check),
        help("the job stays in the plan and will be re-run")
    )]
    StatusCheck { request_id: String, message: String },

    #[error("could not download recovered output from {url}: {message}")]
    #[diagnostic(
        code(planloom::recovery::download),
        help("the job stays in the plan and will be re-run")
    )]
    Download { url: String, message: String },
}

/// The seam to the provider's status/retrieval API, injectable for tests.
#[async_trait]
pub trait RecoveryClient: Send + Sync {
    /// Asks the provider what became of a previously accepted request.
    async fn check_status(&self, request_id: &str) -> Result<ProviderStatus, RecoveryError>;

    /// Fetches the bytes behind one output URL of a completed request.
    async fn download(&self, url: &str) -> Result<DownloadedBinary, RecoveryError>;
}

/// One artifact whose recovery could not be completed.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedRecovery {
    pub artifact_id: NodeId,
    pub reason: String,
}

/// What the prepass did, for caller display.
#[derive(Clone, Debug, Default)]
pub struct RecoverySummary {
    /// Every recoverable-failed artifact the prepass examined.
    pub checked_artifact_ids: Vec<NodeId>,
    /// Artifacts materialized from completed provider requests.
    pub recovered_artifact_ids: Vec<NodeId>,
    /// Artifacts whose requests are still running; their jobs stay planned.
    pub pending_artifact_ids: Vec<NodeId>,
    /// Artifacts that stay dirty with the reason recovery was abandoned.
    pub failed_recoveries: Vec<FailedRecovery>,
}

impl RecoverySummary {
    pub fn is_empty(&self) -> bool {
        self.checked_artifact_ids.is_empty()
    }
}

/// Walks the manifest for recoverable failures and settles each one.
///
/// Recovered artifacts are appended to the event log as `succeeded` events
/// carrying the failed event's `inputs_hash`, so the subsequent dirty pass
/// sees them as clean. The returned events have already been appended;
/// the caller applies them to its in-memory manifest.
pub(crate) async fn prepass(
    manifest: &Manifest,
    events: &[ArtifactEvent],
    revision: &Revision,
    store: &BlobStore,
    log: &dyn EventLog,
    client: &dyn RecoveryClient,
) -> Result<(RecoverySummary, Vec<ArtifactEvent>), PlanError> {
    // Diagnostics live on events, not manifest entries; index the last
    // event per artifact (the one the entry was folded from).
    let mut last: FxHashMap<&NodeId, &ArtifactEvent> = FxHashMap::default();
    for event in events {
        last.insert(&event.artifact_id, event);
    }

    let mut summary = RecoverySummary::default();
    let mut appended = Vec::new();

    for (artifact_id, entry) in manifest.artifacts() {
        if entry.status != ArtifactStatus::Failed {
            continue;
        }
        let Some(event) = last.get(artifact_id) else {
            continue;
        };
        let Some(diagnostics) = event.diagnostics.as_ref() else {
            continue;
        };
        if !diagnostics.recoverable {
            continue;
        }

        summary.checked_artifact_ids.push(artifact_id.clone());

        let request_id = diagnostics
            .provider_request_id
            .as_deref()
            .filter(|id| !id.is_empty());
        let Some(request_id) = request_id else {
            warn!(
                target: "planloom::planner",
                artifact = %artifact_id,
                "recoverable failure carries no provider request id; staying dirty"
            );
            summary.failed_recoveries.push(FailedRecovery {
                artifact_id: artifact_id.clone(),
                reason: "recoverable failure carries no provider request id".to_string(),
            });
            continue;
        };

        match client.check_status(request_id).await {
            Ok(ProviderStatus::Completed { urls }) => {
                let Some(url) = urls.first() else {
                    summary.failed_recoveries.push(FailedRecovery {
                        artifact_id: artifact_id.clone(),
                        reason: "provider reported completion without an output URL".to_string(),
                    });
                    continue;
                };
                match client.download(url).await {
                    Ok(binary) => {
                        let blob = store.persist(&binary.data, &binary.mime_type).await?;
                        let recovered = ArtifactEvent::succeeded(
                            artifact_id.clone(),
                            revision.clone(),
                            event.inputs_hash.clone(),
                            blob,
                            event.produced_by.clone(),
                        );
                        log.append(&recovered).await?;
                        appended.push(recovered);
                        summary.recovered_artifact_ids.push(artifact_id.clone());
                        debug!(
                            target: "planloom::planner",
                            artifact = %artifact_id,
                            request_id,
                            "recovered completed provider output"
                        );
                    }
                    Err(error) => {
                        summary.failed_recoveries.push(FailedRecovery {
                            artifact_id: artifact_id.clone(),
                            reason: error.to_string(),
                        });
                    }
                }
            }
            Ok(ProviderStatus::InProgress) => {
                summary.pending_artifact_ids.push(artifact_id.clone());
                debug!(
                    target: "planloom::planner",
                    artifact = %artifact_id,
                    request_id,
                    "provider request still in progress; job stays planned"
                );
            }
            Ok(ProviderStatus::Failed { reason }) => {
                summary.failed_recoveries.push(FailedRecovery {
                    artifact_id: artifact_id.clone(),
                    reason,
                });
            }
            Err(error) => {
                summary.failed_recoveries.push(FailedRecovery {
                    artifact_id: artifact_id.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    if !summary.is_empty() {
        info!(
            target: "planloom::planner",
            checked = summary.checked_artifact_ids.len(),
            recovered = summary.recovered_artifact_ids.len(),
            pending = summary.pending_artifact_ids.len(),
            failed = summary.failed_recoveries.len(),
            "recovery prepass complete"
        );
    }
    Ok((summary, appended))
}

/// Scripted recovery client for tests and dry runs.
///
/// Statuses are keyed by provider request id, downloads by URL; anything
/// unscripted errors. [`MemoryRecovery::checked`] exposes which request ids
/// were actually status-checked.
#[derive(Debug, Default)]
pub struct MemoryRecovery {
    statuses: Mutex<FxHashMap<String, ProviderStatus>>,
    downloads: Mutex<FxHashMap<String, DownloadedBinary>>,
    checked: Mutex<Vec<String>>,
}

impl MemoryRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(self, request_id: impl Into<String>, status: ProviderStatus) -> Self {
        self.statuses.lock().insert(request_id.into(), status);
        self
    }

    #[must_use]
    pub fn download(
        self,
        url: impl Into<String>,
        data: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
    ) -> Self {
        self.downloads.lock().insert(
            url.into(),
            DownloadedBinary {
                data: data.into(),
                mime_type: mime_type.into(),
            },
        );
        self
    }

    /// Request ids that were status-checked, in call order.
    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().clone()
    }
}

#[async_trait]
impl RecoveryClient for MemoryRecovery {
    async fn check_status(&self, request_id: &str) -> Result<ProviderStatus, RecoveryError> {
        self.checked.lock().push(request_id.to_string());
        self.statuses
            .lock()
            .get(request_id)
            .cloned()
            .ok_or_else(|| RecoveryError::StatusCheck {
                request_id: request_id.to_string(),
                message: "no scripted status".to_string(),
            })
    }

    async fn download(&self, url: &str) -> Result<DownloadedBinary, RecoveryError> {
        self.downloads
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| RecoveryError::Download {
                url: url.to_string(),
                message: "no scripted download".to_string(),
            })
    }
}
