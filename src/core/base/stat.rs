use std::time::Duration;

use super::Resource;

/// RetStatus is the observed outcome class of one invocation or probe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RetStatus {
    Success,
    Fail,
    Timeout,
}

impl RetStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RetStatus::Success)
    }
}

/// ResourceStat is a single outcome submitted to the circuit breaker,
/// either from the caller's request path or from a probe worker.
#[derive(Debug, Clone)]
pub struct ResourceStat {
    pub resource: Resource,
    pub ret_code: String,
    pub delay: Duration,
    pub ret_status: RetStatus,
    /// breaker generation read before a probe started; `None` on caller
    /// reports. Outcomes older than the breaker's current generation are
    /// dropped.
    pub generation: Option<u64>,
}

impl ResourceStat {
    pub fn new(
        resource: Resource,
        ret_code: impl Into<String>,
        delay: Duration,
        ret_status: RetStatus,
    ) -> Self {
        ResourceStat {
            resource,
            ret_code: ret_code.into(),
            delay,
            ret_status,
            generation: None,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}
