//! # Planloom: blueprint planning and execution engine
//!
//! Planloom turns a declarative blueprint of producers and artifacts into
//! a dependency-layered execution plan, runs only the work whose inputs
//! changed, and records every outcome in an append-only event log.
//!
//! ## Core Concepts
//!
//! - **Blueprint**: Declarative producers, the artifacts they write, the
//!   inputs they consume, loop dimensions, and gating conditions
//! - **Canonical graph**: The loop-expanded form with structurally-typed
//!   ids (`Producer:story.scene[2]`)
//! - **Job graph**: One executable job per producer instance, provider
//!   bindings resolved through the catalog
//! - **Planner**: Folds the event log into a manifest, marks dirty jobs by
//!   input-hash comparison, recovers interrupted provider work, and layers
//!   the rest with Kahn's algorithm
//! - **Runner**: Executes layers in sequence and jobs within a layer
//!   concurrently, recording one event per artifact
//! - **Store**: Content-addressed blobs plus persisted plan and manifest
//!   snapshots per revision
//!
//! ## Quick Start
//!
//! ### Declaring a blueprint
//!
//! ```rust
//! use planloom::blueprint::{Blueprint, ProducerSpec, SourceRef, expand};
//! use std::collections::BTreeMap;
//!
//! let blueprint = Blueprint::builder("shorts")
//!     .add_input("topic")
//!     .add_producer(
//!         ProducerSpec::new("script", "writer")
//!             .output("text")
//!             .consume("topic", SourceRef::input("topic")),
//!     )
//!     .build();
//!
//! let canonical = expand(&blueprint, &BTreeMap::new()).unwrap();
//! // Producer:script, Artifact:script.text, Input:topic
//! assert_eq!(canonical.nodes.len(), 3);
//! ```
//!
//! ### Planning and running
//!
//! The [`engine::Engine`] facade ties a blueprint, a provider catalog,
//! project storage, and a [`runner::Produce`] adapter together:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use planloom::blueprint::{Blueprint, ProducerSpec, SourceRef};
//! use planloom::catalog::{CatalogEntry, ProviderCatalog};
//! use planloom::engine::Engine;
//! use planloom::jobs::JobDescriptor;
//! use planloom::planner::PlanOptions;
//! use planloom::runner::{JobError, Produce, ProduceOutcome, ProducedArtifact, RunContext};
//! use planloom::value::InputValues;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Produce for Echo {
//!     async fn produce(
//!         &self,
//!         job: &JobDescriptor,
//!         _ctx: RunContext,
//!     ) -> Result<ProduceOutcome, JobError> {
//!         let artifacts = job
//!             .produces
//!             .iter()
//!             .map(|id| ProducedArtifact::new(id.clone(), "done"))
//!             .collect();
//!         Ok(ProduceOutcome::succeeded(artifacts))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let blueprint = Blueprint::builder("shorts")
//!     .add_input("topic")
//!     .add_producer(
//!         ProducerSpec::new("script", "writer")
//!             .output("text")
//!             .consume("topic", SourceRef::input("topic")),
//!     )
//!     .build();
//! let catalog = ProviderCatalog::new()
//!     .with_entry("writer", CatalogEntry::new("textgen").model("fast", "textgen-1"));
//!
//! let engine = Engine::new(blueprint, Arc::new(Echo)).with_catalog(catalog);
//! let inputs = InputValues::new().set("topic", "volcanoes");
//! let outcome = engine.plan_and_run(&inputs, &PlanOptions::default()).await?;
//! assert!(outcome.result.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! Re-planning after a clean run schedules nothing: every job's recorded
//! input hash still matches, so the plan comes back empty.
//!
//! ## Module Guide
//!
//! - [`types`] - Canonical ids ([`types::NodeId`], [`types::JobId`]) and revisions
//! - [`value`] - The artifact value model with blob externalization
//! - [`blueprint`] - Documents, the fluent builder, and loop expansion
//! - [`catalog`] - Provider catalog and per-producer options
//! - [`assembler`] - Canonical graph to executable job graph
//! - [`layering`] - Kahn layering with cycle detection
//! - [`manifest`] - The folded view of recorded artifacts
//! - [`events`] - Artifact events and the append-only log
//! - [`store`] - Blob store and per-project storage layout
//! - [`planner`] - Dirty evaluation, recovery prepass, plan construction
//! - [`runner`] - Layer execution, progress reporting, the `Produce` seam
//! - [`engine`] - The high-level facade
//! - [`telemetry`] - Tracing subscriber setup

pub mod assembler;
pub mod blueprint;
pub mod cancel;
pub mod catalog;
pub mod engine;
pub mod events;
pub mod hashing;
pub mod jobs;
pub mod layering;
pub mod manifest;
pub mod planner;
pub mod runner;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod value;
