//! Pluggable active health probes.
//!
//! A `HealthChecker` implements one probe protocol (HTTP, TCP, UDP, ...).
//! The probe scheduler resolves a target per instance, hands it to the
//! plugin registered for the rule's protocol, and feeds the outcome into
//! the circuit breaker. Concrete probe implementations live outside the
//! core; the registry is assembled at build time and immutable afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::base::RetStatus;
use crate::faultdetect::{FaultDetectRule, Protocol};
use crate::Result;

/// DetectTarget is the resolved probe address: the instance's host and
/// either its own port or the rule's override port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetectTarget {
    pub host: String,
    pub port: u32,
}

/// DetectResult is what a probe plugin observed for one target.
#[derive(Debug, Clone)]
pub struct DetectResult {
    pub code: String,
    pub delay: Duration,
    pub ret_status: RetStatus,
}

#[cfg_attr(test, mockall::automock)]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> String;

    fn protocol(&self) -> Protocol;

    /// Probe one target. The rule is passed through so the plugin can
    /// consume its protocol-specific payload; `timeout` is the per-probe
    /// deadline the plugin must honor. An `Err` means the probe itself
    /// could not run and is treated as indeterminate by the scheduler.
    fn detect_instance(
        &self,
        target: &DetectTarget,
        rule: &FaultDetectRule,
        timeout: Duration,
    ) -> Result<DetectResult>;
}

/// Protocol to plugin mapping, frozen once the composite breaker is built.
pub type HealthCheckerRegistry = HashMap<Protocol, Arc<dyn HealthChecker>>;
