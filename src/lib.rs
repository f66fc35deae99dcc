//! # Meshguard fault-tolerance core
//!
//! This crate is the client-side fault-tolerance core of the Meshguard
//! service-mesh SDK. It consumes fault-detect rules and instance updates
//! pushed by the control plane, runs active health probes against service
//! instances, and drives one circuit-breaker state machine per protected
//! resource. The breaker status gates traffic in the calling application.
//!
//! Generally, there are several steps when embedding the core:
//! 1. Initialize configuration and logging via the `api` module.
//! 2. Build a `CompositeCircuitBreaker` with the health-check plugins for
//!    the probe protocols you support.
//! 3. Feed it `FaultDetector` updates and instance appearances from your
//!    control-plane connector, and `ResourceStat` reports from the request
//!    path.
//! 4. Consult `CompositeCircuitBreaker::check_resource` before each
//!    outbound call, and drain the per-resource status-change log from your
//!    metrics sink.
//!
//! Protocol-specific probe implementations (HTTP/TCP/UDP) are pluggable
//! through the `healthcheck::HealthChecker` trait and are not part of this
//! crate.

/// Topmost initialization APIs.
pub mod api;
/// Core implementations: the resource model, configuration, fault-detect
/// rule matching and probe scheduling, and the circuit-breaker state
/// machine with its status-change log.
pub mod core;
/// Adapters for the supported logging crates.
pub mod logging;
// Utility functions: time source, cancellation, shutdown bookkeeping.
pub mod utils;

// re-export precludes
pub use crate::core::*;
pub use api::*;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
