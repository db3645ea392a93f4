//! `relocus-runtime` – the localization coordinator.
//!
//! Wires the state history, the origin registry and the outbound seams into
//! one per-tick driver.
//!
//! # Modules
//!
//! - [`coordinator`] – [`LocalizationCoordinator`][coordinator::LocalizationCoordinator]:
//!   consumes odometry messages and landmark observations, commits vision
//!   keyframes, rejiggers origins and delocalizes when odometry can no longer
//!   be trusted.
//! - [`config`] – [`CoordinatorConfig`][config::CoordinatorConfig]: history
//!   window, mismatch tolerance, height filter weight and drive-centre offset.
//! - [`landmark`] – [`Landmark`][landmark::Landmark] records and
//!   [`LandmarkObservation`][landmark::LandmarkObservation]s handed in by
//!   perception.
//! - [`links`] – the [`ActuatorLink`][links::ActuatorLink] and
//!   [`SpatialRegistry`][links::SpatialRegistry] traits, plus
//!   [`EventRecorder`][links::EventRecorder] which implements both.
//! - [`mismatch_guard`] – [`EpochMismatchGuard`][mismatch_guard::EpochMismatchGuard]:
//!   counts consecutive ticks on a stale frame epoch.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter
//!   (`OTEL_EXPORTER_OTLP_ENDPOINT`).

pub mod config;
pub mod coordinator;
pub mod landmark;
pub mod links;
pub mod mismatch_guard;
pub mod telemetry;

pub use config::CoordinatorConfig;
pub use coordinator::{LocalizationCoordinator, LocalizationState};
pub use landmark::{Landmark, LandmarkObservation, Marker};
pub use links::{ActuatorLink, EventRecorder, SpatialRegistry};
pub use mismatch_guard::EpochMismatchGuard;
pub use telemetry::{TracerProviderGuard, init_tracing};
