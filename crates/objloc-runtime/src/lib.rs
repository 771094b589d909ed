//! `objloc-runtime` – drives the localization pipeline.
//!
//! # Modules
//!
//! - [`frame_cache`] – [`FrameCache`][frame_cache::FrameCache]: single-slot,
//!   most-recent-wins store for the latest point cloud, with staleness checks.
//! - [`orchestrator`] –
//!   [`LocalizationOrchestrator`][orchestrator::LocalizationOrchestrator]:
//!   turns detection batches and cached clouds into estimates, poses, debug
//!   points and landmarks, and publishes them on the
//!   [`EventBus`][objloc_middleware::EventBus].
//! - [`node`] – [`Node`][node::Node]: the single consumer loop that feeds
//!   inbound traffic to the orchestrator one message at a time.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod frame_cache;
pub mod node;
pub mod orchestrator;
pub mod telemetry;

pub use frame_cache::FrameCache;
pub use node::{pump, Node, NodeStats};
pub use orchestrator::{
    BatchOutcome, FusionMode, LocalizationOrchestrator, LocalizeTrigger, OrchestratorConfig,
    PlaneFitterKind,
};
pub use telemetry::{init_tracing, TracerProviderGuard};
