//! The engine facade: one object tying a blueprint, its provider catalog,
//! project storage, and a [`Produce`] adapter into plan/run operations.
//!
//! [`Engine`] is the convenience surface. Each call to [`Engine::plan`]
//! expands and assembles the blueprint fresh, plans a new revision, and
//! persists the plan; [`Engine::run`] executes a plan and persists the
//! resulting manifest snapshot. Callers needing finer control use
//! [`Planner`] and [`PlanRunner`](crate::runner::PlanRunner) directly.

use miette::Diagnostic;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::assembler::{AssembleError, assemble};
use crate::blueprint::{Blueprint, GraphError, expand, resolve_loop_counts};
use crate::cancel::CancelToken;
use crate::catalog::{ProducerOptionsMap, ProviderCatalog};
use crate::events::{EventLog, EventLogError};
use crate::manifest::Manifest;
use crate::planner::{ExecutionPlan, PlanError, PlanOptions, PlanReport, Planner, RecoveryClient};
use crate::runner::{PlanRunner, Produce, ProgressEmitter, RunOptions, RunResult, RunnerError};
use crate::store::{ProjectStorage, StoreError};
use crate::types::Revision;
use crate::value::InputValues;

/// Knobs for an [`Engine`], resolved once at construction.
///
/// Defaults fall back to the environment (a `.env` file is honored):
/// `PLANLOOM_STORAGE_DIR` (default `.planloom`), `PLANLOOM_CONCURRENCY`
/// (default 4), `PLANLOOM_PROGRESS_CAPACITY` (default 1024).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Root of the project directory (blobs, events, runs).
    pub storage_dir: PathBuf,
    /// Per-layer job concurrency used by [`Engine::run_options`].
    pub concurrency: usize,
    /// Bound of the progress channel, for callers wiring a bus.
    pub progress_capacity: usize,
}

impl EngineConfig {
    pub const DEFAULT_CONCURRENCY: usize = 4;
    pub const DEFAULT_PROGRESS_CAPACITY: usize = 1024;

    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity;
        self
    }

    fn env_usize(name: &str, default: usize) -> usize {
        std::env::var(name)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(default)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        let storage_dir = std::env::var("PLANLOOM_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".planloom"));
        Self {
            storage_dir,
            concurrency: Self::env_usize("PLANLOOM_CONCURRENCY", Self::DEFAULT_CONCURRENCY),
            progress_capacity: Self::env_usize(
                "PLANLOOM_PROGRESS_CAPACITY",
                Self::DEFAULT_PROGRESS_CAPACITY,
            ),
        }
    }
}

/// Any failure surfaced through the facade.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(code(planloom::engine::graph))]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(code(planloom::engine::assemble))]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    #[diagnostic(code(planloom::engine::plan))]
    Plan(#[from] PlanError),

    #[error(transparent)]
    #[diagnostic(code(planloom::engine::run))]
    Run(#[from] RunnerError),

    #[error(transparent)]
    #[diagnostic(code(planloom::engine::store))]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(planloom::engine::event_log))]
    EventLog(#[from] EventLogError),
}

/// What [`Engine::plan_and_run`] produced.
#[derive(Debug)]
pub struct EngineOutcome {
    pub report: PlanReport,
    pub result: RunResult,
    /// The manifest after the run, as persisted.
    pub manifest: Manifest,
}

/// A blueprint bound to storage, a catalog, and a provider adapter.
pub struct Engine {
    blueprint: Blueprint,
    catalog: ProviderCatalog,
    producer_options: ProducerOptionsMap,
    storage: ProjectStorage,
    log: Arc<dyn EventLog>,
    producer: Arc<dyn Produce>,
    recovery: Option<Arc<dyn RecoveryClient>>,
    progress: ProgressEmitter,
    cancel: CancelToken,
    config: EngineConfig,
}

impl Engine {
    /// An engine over [`EngineConfig::default`] (environment-driven).
    pub fn new(blueprint: Blueprint, producer: Arc<dyn Produce>) -> Self {
        Self::with_config(blueprint, producer, EngineConfig::default())
    }

    pub fn with_config(
        blueprint: Blueprint,
        producer: Arc<dyn Produce>,
        config: EngineConfig,
    ) -> Self {
        let storage = ProjectStorage::open(&config.storage_dir);
        let log: Arc<dyn EventLog> = Arc::new(storage.event_log());
        Self {
            blueprint,
            catalog: ProviderCatalog::new(),
            producer_options: ProducerOptionsMap::new(),
            storage,
            log,
            producer,
            recovery: None,
            progress: ProgressEmitter::disabled(),
            cancel: CancelToken::new(),
            config,
        }
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: ProviderCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn with_producer_options(mut self, options: ProducerOptionsMap) -> Self {
        self.producer_options = options;
        self
    }

    /// Enables the planner's failure-recovery prepass.
    #[must_use]
    pub fn with_recovery(mut self, client: Arc<dyn RecoveryClient>) -> Self {
        self.recovery = Some(client);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressEmitter) -> Self {
        self.progress = progress;
        self
    }

    pub fn storage(&self) -> &ProjectStorage {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The token runs observe; cancel it to stop between layers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run options seeded from this engine's configuration.
    pub fn run_options(&self) -> RunOptions {
        RunOptions::new().with_concurrency(self.config.concurrency)
    }

    /// Plans a fresh revision and persists the plan file.
    ///
    /// The blueprint is expanded and assembled from scratch on every call,
    /// so loop counts driven by inputs pick up their current values.
    #[instrument(skip_all, fields(blueprint = self.blueprint.name()), err)]
    pub async fn plan(
        &self,
        inputs: &InputValues,
        options: &PlanOptions,
    ) -> Result<PlanReport, EngineError> {
        let counts = resolve_loop_counts(&self.blueprint, inputs)?;
        let canonical = expand(&self.blueprint, &counts)?;
        let graph = assemble(
            &self.blueprint,
            &canonical,
            &self.catalog,
            &self.producer_options,
            inputs,
        )?;

        let mut planner = Planner::new(Arc::clone(&self.log), self.storage.blobs().clone());
        if let Some(client) = &self.recovery {
            planner = planner.with_recovery(Arc::clone(client));
        }
        let report = planner
            .plan(Revision::generate(), &graph, inputs, options)
            .await?;
        self.storage.persist_plan(&report.plan).await?;
        Ok(report)
    }

    /// Executes a plan and persists the post-run manifest snapshot.
    #[instrument(skip_all, fields(revision = %plan.revision), err)]
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        inputs: &InputValues,
        options: &RunOptions,
    ) -> Result<RunResult, EngineError> {
        let runner = PlanRunner::new(
            Arc::clone(&self.log),
            self.storage.blobs().clone(),
            inputs.clone(),
        )
        .with_progress(self.progress.clone())
        .with_cancel(self.cancel.clone());

        let result = runner.run(plan, Arc::clone(&self.producer), options).await?;
        let manifest = runner.build_manifest(plan.revision.clone()).await?;
        self.storage.persist_manifest(&manifest).await?;
        Ok(result)
    }

    /// Plans and immediately runs, with run options from the config.
    pub async fn plan_and_run(
        &self,
        inputs: &InputValues,
        options: &PlanOptions,
    ) -> Result<EngineOutcome, EngineError> {
        let report = self.plan(inputs, options).await?;
        let result = self.run(&report.plan, inputs, &self.run_options()).await?;
        let manifest = self.manifest(report.plan.revision.clone()).await?;
        Ok(EngineOutcome {
            report,
            result,
            manifest,
        })
    }

    /// The current manifest, folded from the full event log.
    pub async fn manifest(&self, revision: Revision) -> Result<Manifest, EngineError> {
        let events = self.log.read_all().await?;
        Ok(Manifest::fold(revision, &events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{ProducerSpec, SourceRef};
    use crate::catalog::CatalogEntry;
    use crate::jobs::JobDescriptor;
    use crate::runner::{
        JobError, MemorySink, ProduceOutcome, ProducedArtifact, ProgressBus, ProgressEvent,
        RunContext, RunStatus,
    };
    use async_trait::async_trait;

    fn blueprint() -> Blueprint {
        Blueprint::builder("demo")
            .add_input("topic")
            .add_producer(
                ProducerSpec::new("script", "writer")
                    .output("text")
                    .consume("topic", SourceRef::input("topic")),
            )
            .add_producer(
                ProducerSpec::new("summary", "writer")
                    .output("text")
                    .consume("script", SourceRef::artifact("script.text")),
            )
            .build()
    }

    fn catalog() -> ProviderCatalog {
        ProviderCatalog::new()
            .with_entry("writer", CatalogEntry::new("textgen").model("only", "textgen-1"))
    }

    fn engine(dir: &tempfile::TempDir) -> Engine {
        let config = EngineConfig::default()
            .with_storage_dir(dir.path().join("project"))
            .with_concurrency(2);
        Engine::with_config(blueprint(), Arc::new(EchoProducer), config).with_catalog(catalog())
    }

    struct EchoProducer;

    #[async_trait]
    impl Produce for EchoProducer {
        async fn produce(
            &self,
            job: &JobDescriptor,
            _ctx: RunContext,
        ) -> Result<ProduceOutcome, JobError> {
            let artifacts = job
                .produces
                .iter()
                .map(|id| ProducedArtifact::new(id.clone(), format!("text of {id}")))
                .collect();
            Ok(ProduceOutcome::succeeded(artifacts))
        }
    }

    #[tokio::test]
    async fn plan_runs_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let inputs = InputValues::new().set("topic", "volcanoes");

        let report = engine.plan(&inputs, &PlanOptions::default()).await.unwrap();
        assert_eq!(report.plan.job_count(), 2);
        assert_eq!(report.plan.layers.len(), 2);

        let result = engine
            .run(&report.plan, &inputs, &engine.run_options())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Succeeded);

        let manifest = engine
            .manifest(report.plan.revision.clone())
            .await
            .unwrap();
        assert_eq!(manifest.len(), 2);

        // Both run files landed on disk.
        let stored = engine
            .storage()
            .load_plan(&report.plan.revision)
            .await
            .unwrap();
        assert_eq!(stored.job_count(), 2);
        let snapshot = engine
            .storage()
            .load_manifest(&report.plan.revision)
            .await
            .unwrap();
        assert_eq!(snapshot.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replanning_after_a_clean_run_schedules_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let inputs = InputValues::new().set("topic", "volcanoes");

        let outcome = engine
            .plan_and_run(&inputs, &PlanOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.result.status, RunStatus::Succeeded);
        assert_eq!(outcome.manifest.len(), 2);

        let replan = engine.plan(&inputs, &PlanOptions::default()).await.unwrap();
        assert_eq!(replan.plan.job_count(), 0);
        assert!(replan.plan.is_empty());
    }

    #[tokio::test]
    async fn a_changed_input_dirties_the_whole_chain() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);

        let first = InputValues::new().set("topic", "volcanoes");
        engine
            .plan_and_run(&first, &PlanOptions::default())
            .await
            .unwrap();

        let second = InputValues::new().set("topic", "glaciers");
        let report = engine.plan(&second, &PlanOptions::default()).await.unwrap();
        assert_eq!(report.plan.job_count(), 2);
    }

    #[tokio::test]
    async fn progress_streams_through_a_wired_bus() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let bus = ProgressBus::new(64).with_sink(sink.clone());
        bus.listen();

        let engine = engine(&dir).with_progress(bus.emitter());
        let inputs = InputValues::new().set("topic", "volcanoes");
        engine
            .plan_and_run(&inputs, &PlanOptions::default())
            .await
            .unwrap();
        bus.stop().await;

        let events = sink.snapshot();
        assert!(matches!(events.first(), Some(ProgressEvent::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::RunCompleted {
                status: RunStatus::Succeeded,
                ..
            })
        ));
    }
}
