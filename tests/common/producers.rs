#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use planloom::events::Diagnostics;
use planloom::jobs::JobDescriptor;
use planloom::runner::{JobError, Produce, ProduceOutcome, ProducedArtifact, RunContext};
use tokio::time::{Duration, sleep};

fn echo_artifacts(job: &JobDescriptor, marker: &str) -> Vec<ProducedArtifact> {
    job.produces
        .iter()
        .map(|id| ProducedArtifact::new(id.clone(), format!("{id}#{marker}")))
        .collect()
}

/// Writes `{artifact id}#{marker}` text for every declared output.
pub struct EchoProducer {
    pub marker: &'static str,
}

impl EchoProducer {
    pub fn new(marker: &'static str) -> Self {
        Self { marker }
    }
}

#[async_trait]
impl Produce for EchoProducer {
    async fn produce(
        &self,
        job: &JobDescriptor,
        _ctx: RunContext,
    ) -> Result<ProduceOutcome, JobError> {
        Ok(ProduceOutcome::succeeded(echo_artifacts(job, self.marker)))
    }
}

/// Fails every job of one alias with a plain diagnostic, echoes the rest.
pub struct FailAlias {
    pub alias: &'static str,
}

#[async_trait]
impl Produce for FailAlias {
    async fn produce(
        &self,
        job: &JobDescriptor,
        _ctx: RunContext,
    ) -> Result<ProduceOutcome, JobError> {
        if job.producer == self.alias {
            return Ok(ProduceOutcome::failed(Diagnostics::failure(format!(
                "{} refused the request",
                self.alias
            ))));
        }
        Ok(ProduceOutcome::succeeded(echo_artifacts(job, "ok")))
    }
}

/// Fails one alias with a recoverable diagnostic carrying a provider
/// request id, echoes the rest.
pub struct RecoverableFailer {
    pub alias: &'static str,
    pub request_id: &'static str,
}

#[async_trait]
impl Produce for RecoverableFailer {
    async fn produce(
        &self,
        job: &JobDescriptor,
        _ctx: RunContext,
    ) -> Result<ProduceOutcome, JobError> {
        if job.producer == self.alias {
            return Ok(ProduceOutcome::failed(
                Diagnostics::failure("provider request timed out").recoverable(self.request_id),
            ));
        }
        Ok(ProduceOutcome::succeeded(echo_artifacts(job, "ok")))
    }
}

/// Echoes after a short sleep while tracking how many invocations overlap.
pub struct CountingProducer {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingProducer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// Largest number of jobs ever in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Produce for CountingProducer {
    async fn produce(
        &self,
        job: &JobDescriptor,
        _ctx: RunContext,
    ) -> Result<ProduceOutcome, JobError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ProduceOutcome::succeeded(echo_artifacts(job, "counted")))
    }
}

/// Echoes normally but fires the run's cancel token once the named alias
/// executes.
pub struct CancelOnAlias {
    pub alias: &'static str,
}

#[async_trait]
impl Produce for CancelOnAlias {
    async fn produce(
        &self,
        job: &JobDescriptor,
        ctx: RunContext,
    ) -> Result<ProduceOutcome, JobError> {
        if job.producer == self.alias {
            ctx.cancel.cancel();
        }
        Ok(ProduceOutcome::succeeded(echo_artifacts(job, "ok")))
    }
}
