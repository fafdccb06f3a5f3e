//! Run progress reporting.
//!
//! The runner emits [`ProgressEvent`]s through a [`ProgressEmitter`]; a
//! [`ProgressBus`] fans them out to registered [`ProgressSink`]s on a
//! background listener task. Emission is fire-and-forget over a bounded
//! channel: a slow or absent listener drops events rather than stalling
//! job execution.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::runner::produce::{JobStatus, RunStatus};
use crate::types::{JobId, Revision};

/// One step in a run's lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        revision: Revision,
        layers: usize,
        jobs: usize,
    },
    LayerStarted {
        layer: usize,
        jobs: usize,
    },
    LayerEmpty {
        layer: usize,
    },
    LayerSkipped {
        layer: usize,
        reason: String,
    },
    JobStarted {
        layer: usize,
        job_id: JobId,
    },
    JobCompleted {
        layer: usize,
        job_id: JobId,
        status: JobStatus,
    },
    LayerCompleted {
        layer: usize,
    },
    RunCompleted {
        revision: Revision,
        status: RunStatus,
    },
}

impl ProgressEvent {
    /// Structured rendering for sinks that forward to JSON consumers.
    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            ProgressEvent::RunStarted {
                revision,
                layers,
                jobs,
            } => json!({
                "kind": "run_started",
                "revision": revision.as_str(),
                "layers": layers,
                "jobs": jobs,
            }),
            ProgressEvent::LayerStarted { layer, jobs } => json!({
                "kind": "layer_started",
                "layer": layer,
                "jobs": jobs,
            }),
            ProgressEvent::LayerEmpty { layer } => json!({
                "kind": "layer_empty",
                "layer": layer,
            }),
            ProgressEvent::LayerSkipped { layer, reason } => json!({
                "kind": "layer_skipped",
                "layer": layer,
                "reason": reason,
            }),
            ProgressEvent::JobStarted { layer, job_id } => json!({
                "kind": "job_started",
                "layer": layer,
                "jobId": job_id.as_str(),
            }),
            ProgressEvent::JobCompleted {
                layer,
                job_id,
                status,
            } => json!({
                "kind": "job_completed",
                "layer": layer,
                "jobId": job_id.as_str(),
                "status": match status {
                    JobStatus::Succeeded => "succeeded",
                    JobStatus::Failed => "failed",
                    JobStatus::Skipped => "skipped",
                },
            }),
            ProgressEvent::LayerCompleted { layer } => json!({
                "kind": "layer_completed",
                "layer": layer,
            }),
            ProgressEvent::RunCompleted { revision, status } => json!({
                "kind": "run_completed",
                "revision": revision.as_str(),
                "status": match status {
                    RunStatus::Succeeded => "succeeded",
                    RunStatus::Failed => "failed",
                    RunStatus::Cancelled => "cancelled",
                },
            }),
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::RunStarted {
                revision,
                layers,
                jobs,
            } => write!(f, "run {revision} started: {layers} layers, {jobs} jobs"),
            ProgressEvent::LayerStarted { layer, jobs } => {
                write!(f, "layer {layer}: {jobs} jobs")
            }
            ProgressEvent::LayerEmpty { layer } => write!(f, "layer {layer}: empty"),
            ProgressEvent::LayerSkipped { layer, reason } => {
                write!(f, "layer {layer}: skipped ({reason})")
            }
            ProgressEvent::JobStarted { layer, job_id } => {
                write!(f, "layer {layer}: {job_id} started")
            }
            ProgressEvent::JobCompleted {
                layer,
                job_id,
                status,
            } => {
                let status = match status {
                    JobStatus::Succeeded => "succeeded",
                    JobStatus::Failed => "failed",
                    JobStatus::Skipped => "skipped",
                };
                write!(f, "layer {layer}: {job_id} {status}")
            }
            ProgressEvent::LayerCompleted { layer } => write!(f, "layer {layer}: completed"),
            ProgressEvent::RunCompleted { revision, status } => {
                let status = match status {
                    RunStatus::Succeeded => "succeeded",
                    RunStatus::Failed => "failed",
                    RunStatus::Cancelled => "cancelled",
                };
                write!(f, "run {revision} completed: {status}")
            }
        }
    }
}

/// Receives progress events on the bus's listener task.
pub trait ProgressSink: Send + Sync {
    fn handle(&mut self, event: &ProgressEvent) -> io::Result<()>;
}

/// Writes one human-readable line per event to stdout.
#[derive(Debug, Default)]
pub struct StdOutSink;

impl ProgressSink for StdOutSink {
    fn handle(&mut self, event: &ProgressEvent) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{event}")?;
        out.flush()
    }
}

/// Collects events in memory, mainly for tests.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ProgressSink for MemorySink {
    fn handle(&mut self, event: &ProgressEvent) -> io::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Forwards events into a tokio mpsc channel for async consumers.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelSink {
    fn handle(&mut self, event: &ProgressEvent) -> io::Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "progress receiver dropped"))
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Fans progress events out to sinks on a background task.
pub struct ProgressBus {
    sinks: Arc<Mutex<Vec<Box<dyn ProgressSink>>>>,
    sender: flume::Sender<ProgressEvent>,
    receiver: flume::Receiver<ProgressEvent>,
    listener: Mutex<Option<ListenerState>>,
}

impl ProgressBus {
    /// A bus whose channel holds at most `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity);
        Self {
            sinks: Arc::new(Mutex::new(Vec::new())),
            sender,
            receiver,
            listener: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_sink(self, sink: impl ProgressSink + 'static) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn add_sink(&self, sink: impl ProgressSink + 'static) {
        self.sinks.lock().push(Box::new(sink));
    }

    /// An emitter connected to this bus. Clone freely.
    pub fn emitter(&self) -> ProgressEmitter {
        ProgressEmitter {
            sender: Some(self.sender.clone()),
        }
    }

    /// Starts the listener task. Idempotent.
    pub fn listen(&self) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let receiver = self.receiver.clone();
        let sinks = Arc::clone(&self.sinks);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = receiver.recv_async() => {
                        match event {
                            Ok(event) => deliver(&sinks, &event),
                            Err(_) => break,
                        }
                    }
                }
            }
        });
        *listener = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stops the listener, draining events already queued so sinks see a
    /// complete record of everything emitted before the stop.
    pub async fn stop(&self) {
        let state = self.listener.lock().take();
        let Some(state) = state else {
            return;
        };
        let _ = state.shutdown_tx.send(());
        let _ = state.handle.await;
        while let Ok(event) = self.receiver.try_recv() {
            deliver(&self.sinks, &event);
        }
    }
}

impl Drop for ProgressBus {
    fn drop(&mut self) {
        if let Some(state) = self.listener.lock().take() {
            state.handle.abort();
        }
    }
}

fn deliver(sinks: &Mutex<Vec<Box<dyn ProgressSink>>>, event: &ProgressEvent) {
    for sink in sinks.lock().iter_mut() {
        if let Err(error) = sink.handle(event) {
            tracing::warn!(target: "planloom::progress", %error, "progress sink failed");
        }
    }
}

/// Fire-and-forget handle the runner emits through.
///
/// A disabled emitter silently drops every event, so the runner never
/// branches on whether progress reporting is wired up.
#[derive(Clone, Debug, Default)]
pub struct ProgressEmitter {
    sender: Option<flume::Sender<ProgressEvent>>,
}

impl ProgressEmitter {
    /// An emitter with no bus behind it.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(error) = sender.try_send(event) {
            tracing::debug!(target: "planloom::progress", %error, "progress event dropped");
        }
    }
}
