#![allow(dead_code)]

use std::sync::Arc;

use planloom::assembler::assemble;
use planloom::blueprint::{
    Blueprint, LoopCount, ProducerSpec, SourceRef, expand, resolve_loop_counts,
};
use planloom::catalog::{CatalogEntry, ProducerOptionsMap, ProviderCatalog};
use planloom::events::MemoryEventLog;
use planloom::jobs::JobGraph;
use planloom::manifest::Manifest;
use planloom::planner::{ExecutionPlan, PlanOptions, PlanReport, Planner};
use planloom::runner::{PlanRunner, Produce, RunOptions, RunResult};
use planloom::store::BlobStore;
use planloom::types::Revision;
use planloom::value::InputValues;

use super::producers::EchoProducer;

/// Straight-line pipeline: script writes text, narrate voices it, mix cuts
/// the final clip.
pub fn chain_blueprint() -> Blueprint {
    Blueprint::builder("chain")
        .add_input("topic")
        .add_producer(
            ProducerSpec::new("script", "writer")
                .output("text")
                .consume("topic", SourceRef::input("topic")),
        )
        .add_producer(
            ProducerSpec::new("narrate", "narrator")
                .output("audio")
                .consume("script", SourceRef::artifact("script.text")),
        )
        .add_producer(
            ProducerSpec::new("mix", "mixer")
                .output("final")
                .consume("narration", SourceRef::artifact("narrate.audio")),
        )
        .build()
}

/// Same pipeline with narration looped over a fixed segment count and
/// fanned back into the mix.
pub fn fan_blueprint(segments: usize) -> Blueprint {
    Blueprint::builder("fan")
        .add_input("topic")
        .add_loop("segment", LoopCount::Fixed(segments))
        .add_producer(
            ProducerSpec::new("script", "writer")
                .output("text")
                .consume("topic", SourceRef::input("topic")),
        )
        .add_producer(
            ProducerSpec::new("narrate", "narrator")
                .in_loop("segment")
                .output("audio")
                .consume("script", SourceRef::artifact("script.text")),
        )
        .add_producer(
            ProducerSpec::new("mix", "mixer")
                .output("final")
                .consume("narrations", SourceRef::artifact("narrate.audio")),
        )
        .build()
}

/// One single-model catalog entry per alias the fixture blueprints use.
pub fn catalog() -> ProviderCatalog {
    ProviderCatalog::new()
        .with_entry(
            "writer",
            CatalogEntry::new("textgen").model("fast", "textgen-fast-1"),
        )
        .with_entry(
            "narrator",
            CatalogEntry::new("voicegen").model("fast", "voicegen-fast-1"),
        )
        .with_entry(
            "mixer",
            CatalogEntry::new("mediagen").model("fast", "mediagen-fast-1"),
        )
}

pub fn inputs() -> InputValues {
    InputValues::new().set("topic", "volcanoes")
}

/// Expands and assembles a blueprint against the fixture catalog.
pub fn job_graph(blueprint: &Blueprint, inputs: &InputValues) -> JobGraph {
    let counts = resolve_loop_counts(blueprint, inputs).unwrap();
    let canonical = expand(blueprint, &counts).unwrap();
    assemble(
        blueprint,
        &canonical,
        &catalog(),
        &ProducerOptionsMap::new(),
        inputs,
    )
    .unwrap()
}

/// In-memory planning and execution rig: one shared event log, one blob
/// directory, dropped with the harness.
pub struct Harness {
    pub log: Arc<MemoryEventLog>,
    pub blobs: BlobStore,
    _dir: tempfile::TempDir,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    Harness {
        log: Arc::new(MemoryEventLog::new()),
        blobs: BlobStore::new(dir.path().join("blobs")),
        _dir: dir,
    }
}

impl Harness {
    pub fn planner(&self) -> Planner {
        Planner::new(self.log.clone(), self.blobs.clone())
    }

    pub fn runner(&self, inputs: &InputValues) -> PlanRunner {
        PlanRunner::new(self.log.clone(), self.blobs.clone(), inputs.clone())
    }

    pub async fn plan(&self, graph: &JobGraph, inputs: &InputValues) -> PlanReport {
        self.planner()
            .plan(Revision::generate(), graph, inputs, &PlanOptions::default())
            .await
            .unwrap()
    }

    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        producer: Arc<dyn Produce>,
        inputs: &InputValues,
    ) -> RunResult {
        self.runner(inputs)
            .run(plan, producer, &RunOptions::default())
            .await
            .unwrap()
    }

    /// Plans and runs everything with the echo producer, leaving the
    /// project clean.
    pub async fn seed_clean(&self, graph: &JobGraph, inputs: &InputValues) {
        let report = self.plan(graph, inputs).await;
        self.execute(&report.plan, Arc::new(EchoProducer::new("seed")), inputs)
            .await;
    }

    /// Manifest folded from everything appended to the log so far.
    pub fn manifest(&self, revision: Revision) -> Manifest {
        Manifest::fold(revision, &self.log.snapshot())
    }
}
