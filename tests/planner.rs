//! Planning passes over a live event log: dirtiness, targets and pins,
//! the recovery prepass, and cycle refusal.

mod common;
use common::*;

use std::sync::Arc;

use async_trait::async_trait;
use planloom::assembler::assemble;
use planloom::blueprint::{Blueprint, ProducerSpec, SourceRef, expand, resolve_loop_counts};
use planloom::catalog::{CatalogEntry, ProducerOptions, ProducerOptionsMap, ProviderCatalog};
use planloom::events::Diagnostics;
use planloom::jobs::JobDescriptor;
use planloom::planner::{MemoryRecovery, PlanError, PlanOptions, ProviderStatus};
use planloom::runner::{JobError, Produce, ProduceOutcome, ProducedArtifact, RunContext};
use planloom::types::{NodeId, Revision};
use planloom::value::InputValues;

#[tokio::test]
async fn a_fresh_project_plans_every_job_in_dependency_layers() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);

    let report = h.plan(&graph, &inputs).await;
    assert_eq!(report.plan.layers.len(), 3);
    assert_layer(&report.plan, 0, &[producer_job("script")]);
    assert_layer(&report.plan, 1, &[producer_job("narrate")]);
    assert_layer(&report.plan, 2, &[producer_job("mix")]);
    assert!(report.recovery.is_empty());
}

#[tokio::test]
async fn replanning_a_clean_project_schedules_nothing() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    h.seed_clean(&graph, &inputs).await;

    let report = h.plan(&graph, &inputs).await;
    assert!(report.plan.is_empty());
    assert_eq!(report.plan.job_count(), 0);
}

#[tokio::test]
async fn a_changed_input_reruns_the_whole_chain() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    h.seed_clean(&graph, &inputs).await;

    let changed = InputValues::new().set("topic", "glaciers");
    let report = h.plan(&graph, &changed).await;
    assert_planned_jobs(
        &report.plan,
        &[
            producer_job("script"),
            producer_job("narrate"),
            producer_job("mix"),
        ],
    );
    assert_eq!(report.plan.layers.len(), 3);
}

#[tokio::test]
async fn targeting_a_producer_reruns_it_and_everything_downstream() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    h.seed_clean(&graph, &inputs).await;

    let options = PlanOptions::new().with_target(NodeId::producer("narrate"));
    let report = h
        .planner()
        .plan(Revision::generate(), &graph, &inputs, &options)
        .await
        .unwrap();
    assert_planned_jobs(
        &report.plan,
        &[producer_job("narrate"), producer_job("mix")],
    );
    assert_eq!(report.plan.layers.len(), 2);
}

#[tokio::test]
async fn pinning_a_dirty_artifact_keeps_its_whole_chain_out_of_the_plan() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    h.seed_clean(&graph, &inputs).await;

    // The changed topic dirties script, but the pin holds its output
    // frozen; downstream never sees new content, so nothing runs.
    let changed = InputValues::new().set("topic", "glaciers");
    let options = PlanOptions::new().with_pin(NodeId::artifact("script.text"));
    let report = h
        .planner()
        .plan(Revision::generate(), &graph, &changed, &options)
        .await
        .unwrap();
    assert!(report.plan.is_empty());
}

#[tokio::test]
async fn a_target_overrides_a_pin_on_the_same_artifact() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    h.seed_clean(&graph, &inputs).await;

    let options = PlanOptions::new()
        .with_target(NodeId::artifact("script.text"))
        .with_pin(NodeId::artifact("script.text"));
    let report = h
        .planner()
        .plan(Revision::generate(), &graph, &inputs, &options)
        .await
        .unwrap();
    assert_planned_jobs(
        &report.plan,
        &[
            producer_job("script"),
            producer_job("narrate"),
            producer_job("mix"),
        ],
    );
}

#[tokio::test]
async fn targets_select_individual_loop_instances() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&fan_blueprint(3), &inputs);
    h.seed_clean(&graph, &inputs).await;

    let options = PlanOptions::new()
        .with_target(NodeId::artifact("narrate.audio").indexed([0]))
        .with_target(NodeId::artifact("narrate.audio").indexed([2]));
    let report = h
        .planner()
        .plan(Revision::generate(), &graph, &inputs, &options)
        .await
        .unwrap();

    // Instance 1 stays clean; the mix reruns because its fan-in members
    // regenerate.
    assert_planned_jobs(
        &report.plan,
        &[
            producer_job_at("narrate", &[0]),
            producer_job_at("narrate", &[2]),
            producer_job("mix"),
        ],
    );
    assert_eq!(report.plan.layers.len(), 2);
}

#[tokio::test]
async fn a_completed_recoverable_failure_is_settled_before_dirtiness() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);

    // First run: narration times out recoverably, everything else lands.
    let report = h.plan(&graph, &inputs).await;
    h.execute(
        &report.plan,
        Arc::new(RecoverableFailer {
            alias: "narrator",
            request_id: "req-7",
        }),
        &inputs,
    )
    .await;

    let client = Arc::new(
        MemoryRecovery::new()
            .status(
                "req-7",
                ProviderStatus::Completed {
                    urls: vec!["https://provider.test/req-7/audio".to_string()],
                },
            )
            .download(
                "https://provider.test/req-7/audio",
                b"recovered narration".to_vec(),
                "audio/mpeg",
            ),
    );
    let report = h
        .planner()
        .with_recovery(client.clone())
        .plan(
            Revision::generate(),
            &graph,
            &inputs,
            &PlanOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(client.checked(), vec!["req-7".to_string()]);
    assert_eq!(
        report.recovery.recovered_artifact_ids,
        vec![NodeId::artifact("narrate.audio")]
    );
    // The recovered audio changes what mix consumed, so only mix reruns.
    assert_planned_jobs(&report.plan, &[producer_job("mix")]);

    // The recovered blob is readable through the base manifest.
    let entry = report
        .base_manifest
        .artifact(&NodeId::artifact("narrate.audio"))
        .unwrap();
    let bytes = h.blobs.read(entry.blob.as_ref().unwrap()).await.unwrap();
    assert_eq!(bytes, b"recovered narration");
}

#[tokio::test]
async fn an_in_progress_request_leaves_the_job_planned() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);

    let report = h.plan(&graph, &inputs).await;
    h.execute(
        &report.plan,
        Arc::new(RecoverableFailer {
            alias: "narrator",
            request_id: "req-9",
        }),
        &inputs,
    )
    .await;

    let client = Arc::new(MemoryRecovery::new().status("req-9", ProviderStatus::InProgress));
    let report = h
        .planner()
        .with_recovery(client)
        .plan(
            Revision::generate(),
            &graph,
            &inputs,
            &PlanOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        report.recovery.pending_artifact_ids,
        vec![NodeId::artifact("narrate.audio")]
    );
    assert_planned_jobs(
        &report.plan,
        &[producer_job("narrate"), producer_job("mix")],
    );
}

#[tokio::test]
async fn a_recoverable_failure_without_a_request_id_is_never_status_checked() {
    // A sloppy adapter marks the failure recoverable but records no
    // provider request id.
    struct MalformedFailer;

    #[async_trait]
    impl Produce for MalformedFailer {
        async fn produce(
            &self,
            job: &JobDescriptor,
            _ctx: RunContext,
        ) -> Result<ProduceOutcome, JobError> {
            if job.producer == "narrator" {
                let mut diagnostics = Diagnostics::failure("timed out");
                diagnostics.recoverable = true;
                return Ok(ProduceOutcome::failed(diagnostics));
            }
            Ok(ProduceOutcome::succeeded(
                job.produces
                    .iter()
                    .map(|id| ProducedArtifact::new(id.clone(), "ok"))
                    .collect(),
            ))
        }
    }

    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);

    let report = h.plan(&graph, &inputs).await;
    h.execute(&report.plan, Arc::new(MalformedFailer), &inputs).await;

    let client = Arc::new(MemoryRecovery::new());
    let report = h
        .planner()
        .with_recovery(client.clone())
        .plan(
            Revision::generate(),
            &graph,
            &inputs,
            &PlanOptions::default(),
        )
        .await
        .unwrap();

    assert!(client.checked().is_empty());
    assert_eq!(report.recovery.failed_recoveries.len(), 1);
    assert_planned_jobs(
        &report.plan,
        &[producer_job("narrate"), producer_job("mix")],
    );
}

#[tokio::test]
async fn a_cyclic_graph_refuses_to_plan_before_touching_recovery() {
    let h = harness();
    let inputs = InputValues::new();
    let blueprint = Blueprint::builder("cyclic")
        .add_producer(
            ProducerSpec::new("a", "writer")
                .output("text")
                .consume("b", SourceRef::artifact("b.text")),
        )
        .add_producer(
            ProducerSpec::new("b", "writer")
                .output("text")
                .consume("a", SourceRef::artifact("a.text")),
        )
        .build();
    let graph = job_graph(&blueprint, &inputs);

    let client = Arc::new(MemoryRecovery::new());
    let error = h
        .planner()
        .with_recovery(client.clone())
        .plan(
            Revision::generate(),
            &graph,
            &inputs,
            &PlanOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, PlanError::CycleDetected));
    assert!(client.checked().is_empty());
}

#[tokio::test]
async fn a_changed_model_selection_input_dirties_the_bound_job() {
    let h = harness();
    let blueprint = chain_blueprint();
    let catalog = ProviderCatalog::new()
        .with_entry(
            "writer",
            CatalogEntry::new("textgen").model("fast", "textgen-fast-1"),
        )
        .with_entry(
            "narrator",
            CatalogEntry::new("voicegen")
                .model("fast", "voicegen-fast-1")
                .model("rich", "voicegen-rich-1"),
        )
        .with_entry(
            "mixer",
            CatalogEntry::new("mediagen").model("fast", "mediagen-fast-1"),
        );
    let mut producer_options = ProducerOptionsMap::new();
    producer_options.insert(
        "narrate".to_string(),
        ProducerOptions::new().model_from_input("voice"),
    );
    let assemble_with = |inputs: &InputValues| {
        let counts = resolve_loop_counts(&blueprint, inputs).unwrap();
        let canonical = expand(&blueprint, &counts).unwrap();
        assemble(&blueprint, &canonical, &catalog, &producer_options, inputs).unwrap()
    };

    let first = InputValues::new().set("topic", "volcanoes").set("voice", "fast");
    let graph = assemble_with(&first);
    h.seed_clean(&graph, &first).await;

    // Same topic, richer voice: only narration and what follows rerun.
    let second = InputValues::new().set("topic", "volcanoes").set("voice", "rich");
    let graph = assemble_with(&second);
    let report = h.plan(&graph, &second).await;
    assert_planned_jobs(
        &report.plan,
        &[producer_job("narrate"), producer_job("mix")],
    );
}
