//! Executing plans: layer waves, the concurrency bound, cancellation,
//! failure isolation, and progress reporting.

mod common;
use common::*;

use std::sync::Arc;

use async_trait::async_trait;
use planloom::events::ArtifactStatus;
use planloom::jobs::{JobDescriptor, JobGraph};
use planloom::planner::ExecutionPlan;
use planloom::runner::{
    JobError, JobStatus, MemorySink, Produce, ProduceOutcome, ProducedArtifact, ProgressBus,
    ProgressEvent, RunContext, RunOptions, RunStatus,
};
use planloom::types::NodeId;
use planloom::value::InputValues;

async fn fresh_plan(h: &Harness, graph: &JobGraph, inputs: &InputValues) -> ExecutionPlan {
    h.plan(graph, inputs).await.plan
}

#[tokio::test]
async fn a_chain_runs_to_completion_and_materializes_every_artifact() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    let plan = fresh_plan(&h, &graph, &inputs).await;

    let result = h
        .runner(&inputs)
        .run(
            &plan,
            Arc::new(EchoProducer::new("take1")),
            &RunOptions::new().with_concurrency(2),
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert!(result.is_success());
    let order: Vec<_> = result.jobs.iter().map(|j| j.job_id.clone()).collect();
    assert_eq!(
        order,
        vec![
            producer_job("script"),
            producer_job("narrate"),
            producer_job("mix"),
        ]
    );

    let manifest = h.manifest(plan.revision.clone());
    assert_eq!(manifest.len(), 3);
    let entry = manifest.artifact(&NodeId::artifact("script.text")).unwrap();
    let bytes = h.blobs.read(entry.blob.as_ref().unwrap()).await.unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("script.text#take1"), "stored {text:?}");
}

#[tokio::test]
async fn in_layer_concurrency_respects_the_bound() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&fan_blueprint(4), &inputs);
    let plan = fresh_plan(&h, &graph, &inputs).await;
    assert_eq!(plan.layers[1].len(), 4);

    let probe = Arc::new(CountingProducer::new(40));
    let producer: Arc<dyn Produce> = probe.clone();
    let result = h
        .runner(&inputs)
        .run(&plan, producer, &RunOptions::new().with_concurrency(2))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(probe.peak(), 2);
}

#[tokio::test]
async fn concurrency_one_serializes_a_layer() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&fan_blueprint(3), &inputs);
    let plan = fresh_plan(&h, &graph, &inputs).await;

    let probe = Arc::new(CountingProducer::new(5));
    let producer: Arc<dyn Produce> = probe.clone();
    h.runner(&inputs)
        .run(&plan, producer, &RunOptions::new().with_concurrency(1))
        .await
        .unwrap();

    assert_eq!(probe.peak(), 1);
}

#[tokio::test]
async fn cancellation_after_a_layer_stops_the_rest_of_the_run() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    let plan = fresh_plan(&h, &graph, &inputs).await;

    let result = h
        .runner(&inputs)
        .run(
            &plan,
            Arc::new(CancelOnAlias { alias: "writer" }),
            &RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    // The script job finished and was recorded; narrate and mix never
    // started, so they are absent from both results and log.
    assert_eq!(result.jobs.len(), 1);
    assert_eq!(result.jobs[0].job_id, producer_job("script"));
    assert_eq!(result.jobs[0].status, JobStatus::Succeeded);
    let events = h.log.snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].artifact_id, NodeId::artifact("script.text"));
}

#[tokio::test]
async fn a_failed_job_marks_the_run_failed_but_later_layers_still_execute() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    let plan = fresh_plan(&h, &graph, &inputs).await;

    let result = h
        .runner(&inputs)
        .run(
            &plan,
            Arc::new(FailAlias { alias: "narrator" }),
            &RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let narrate = result.job(&producer_job("narrate")).unwrap();
    assert_eq!(narrate.status, JobStatus::Failed);
    assert!(narrate.diagnostics.is_some());
    // Mix still ran; its recorded hash marks the narration as absent, so a
    // later plan reruns it once the narration lands.
    let mix = result.job(&producer_job("mix")).unwrap();
    assert_eq!(mix.status, JobStatus::Succeeded);

    let manifest = h.manifest(plan.revision.clone());
    assert_eq!(
        manifest
            .artifact(&NodeId::artifact("narrate.audio"))
            .unwrap()
            .status,
        ArtifactStatus::Failed
    );
    assert_eq!(
        manifest
            .artifact(&NodeId::artifact("mix.final"))
            .unwrap()
            .status,
        ArtifactStatus::Succeeded
    );
}

#[tokio::test]
async fn an_adapter_error_counts_as_a_failed_job() {
    struct Erroring;

    #[async_trait]
    impl Produce for Erroring {
        async fn produce(
            &self,
            job: &JobDescriptor,
            _ctx: RunContext,
        ) -> Result<ProduceOutcome, JobError> {
            if job.producer == "writer" {
                return Err(JobError::new("adapter crashed"));
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
    let plan = fresh_plan(&h, &graph, &inputs).await;

    let result = h
        .runner(&inputs)
        .run(&plan, Arc::new(Erroring), &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let script = result.job(&producer_job("script")).unwrap();
    assert_eq!(script.status, JobStatus::Failed);
    let diagnostics = script.diagnostics.as_ref().unwrap();
    assert!(diagnostics.message.contains("adapter crashed"));
}

#[tokio::test]
async fn skipped_jobs_leave_existing_artifacts_untouched() {
    struct SkipMix;

    #[async_trait]
    impl Produce for SkipMix {
        async fn produce(
            &self,
            job: &JobDescriptor,
            _ctx: RunContext,
        ) -> Result<ProduceOutcome, JobError> {
            if job.producer == "mixer" {
                return Ok(ProduceOutcome::skipped("gating condition unmet"));
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
    let plan = fresh_plan(&h, &graph, &inputs).await;

    let result = h
        .runner(&inputs)
        .run(&plan, Arc::new(SkipMix), &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    let mix = result.job(&producer_job("mix")).unwrap();
    assert_eq!(mix.status, JobStatus::Skipped);
    // No event was appended for the skipped job's outputs.
    let manifest = h.manifest(plan.revision.clone());
    assert!(manifest.artifact(&NodeId::artifact("mix.final")).is_none());
}

#[tokio::test]
async fn adapters_read_upstream_bytes_through_the_context() {
    struct Narrating;

    #[async_trait]
    impl Produce for Narrating {
        async fn produce(
            &self,
            job: &JobDescriptor,
            ctx: RunContext,
        ) -> Result<ProduceOutcome, JobError> {
            if job.producer == "narrator" {
                let bytes = ctx
                    .artifact_bytes(&NodeId::artifact("script.text"))
                    .await?
                    .ok_or_else(|| JobError::new("script.text not materialized"))?;
                let script = String::from_utf8_lossy(&bytes).into_owned();
                let artifact = job.produces[0].clone();
                return Ok(ProduceOutcome::succeeded(vec![ProducedArtifact::new(
                    artifact,
                    format!("narrated: {script}"),
                )]));
            }
            Ok(ProduceOutcome::succeeded(
                job.produces
                    .iter()
                    .map(|id| ProducedArtifact::new(id.clone(), "the script"))
                    .collect(),
            ))
        }
    }

    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    let plan = fresh_plan(&h, &graph, &inputs).await;

    h.runner(&inputs)
        .run(&plan, Arc::new(Narrating), &RunOptions::default())
        .await
        .unwrap();

    let manifest = h.manifest(plan.revision.clone());
    let entry = manifest.artifact(&NodeId::artifact("narrate.audio")).unwrap();
    let bytes = h.blobs.read(entry.blob.as_ref().unwrap()).await.unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("narrated:"), "stored {text:?}");
    assert!(text.contains("the script"), "stored {text:?}");
}

#[tokio::test]
async fn progress_events_trace_the_run_in_order() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    let plan = fresh_plan(&h, &graph, &inputs).await;

    let sink = MemorySink::new();
    let bus = ProgressBus::new(64).with_sink(sink.clone());
    bus.listen();
    h.runner(&inputs)
        .with_progress(bus.emitter())
        .run(
            &plan,
            Arc::new(EchoProducer::new("p")),
            &RunOptions::default(),
        )
        .await
        .unwrap();
    bus.stop().await;

    let events = sink.snapshot();
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::RunStarted { jobs: 3, layers: 3, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::RunCompleted {
            status: RunStatus::Succeeded,
            ..
        })
    ));
    for path in ["script", "narrate", "mix"] {
        let id = producer_job(path);
        let started = events
            .iter()
            .position(|e| matches!(e, ProgressEvent::JobStarted { job_id, .. } if job_id == &id));
        let completed = events
            .iter()
            .position(|e| matches!(e, ProgressEvent::JobCompleted { job_id, .. } if job_id == &id));
        assert!(
            started.unwrap() < completed.unwrap(),
            "{path} completed before it started"
        );
    }
}

#[tokio::test]
async fn up_to_layer_stops_the_run_early() {
    let h = harness();
    let inputs = inputs();
    let graph = job_graph(&chain_blueprint(), &inputs);
    let plan = fresh_plan(&h, &graph, &inputs).await;

    let result = h
        .runner(&inputs)
        .run(
            &plan,
            Arc::new(EchoProducer::new("partial")),
            &RunOptions::new().with_up_to_layer(1),
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.jobs.len(), 2);
    let manifest = h.manifest(plan.revision.clone());
    assert!(manifest.artifact(&NodeId::artifact("script.text")).is_some());
    assert!(manifest.artifact(&NodeId::artifact("narrate.audio")).is_some());
    assert!(manifest.artifact(&NodeId::artifact("mix.final")).is_none());
}
