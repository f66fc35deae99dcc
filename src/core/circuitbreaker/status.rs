use serde::{Deserialize, Serialize};
use std::fmt;

use crate::base::ServiceKey;
use crate::{Error, Result};

/// States of the circuit breaker state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Closed,
    HalfOpen,
    Open,
}

impl Default for Status {
    fn default() -> Status {
        Status::Closed
    }
}

/// CircuitBreakerStatus is the per-resource state surfaced to the request
/// path. `generation` increments on every transition and fences outcomes
/// from probes that started before the resource moved on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStatus {
    pub breaker_name: String,
    pub status: Status,
    pub since_ms: u64,
    pub generation: u64,
}

impl CircuitBreakerStatus {
    pub fn closed(breaker_name: impl Into<String>) -> Self {
        CircuitBreakerStatus {
            breaker_name: breaker_name.into(),
            status: Status::Closed,
            since_ms: 0,
            generation: 0,
        }
    }

    /// Whether the request path may send traffic at this status.
    pub fn is_available(&self) -> bool {
        self.status != Status::Open
    }
}

/// StatusChange names one accepted transition of the state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusChange {
    CloseToOpen,
    OpenToHalfOpen,
    HalfOpenToClose,
    HalfOpenToOpen,
}

impl StatusChange {
    /// Build the change node for a transition, rejecting every pair
    /// outside the state machine's table (including same-state pairs).
    /// Rejection leaves the caller's state untouched.
    pub fn for_transition(from: Status, to: Status) -> Result<StatusChange> {
        match (from, to) {
            (Status::Closed, Status::Open) => Ok(StatusChange::CloseToOpen),
            (Status::Open, Status::HalfOpen) => Ok(StatusChange::OpenToHalfOpen),
            (Status::HalfOpen, Status::Closed) => Ok(StatusChange::HalfOpenToClose),
            (Status::HalfOpen, Status::Open) => Ok(StatusChange::HalfOpenToOpen),
            _ => Err(Error::msg(format!(
                "inconsistent circuit breaker transition: {:?} -> {:?}",
                from, to
            ))),
        }
    }
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// CircuitBreakChange is the payload carried by circuit-break status
/// nodes: which transition happened and which breaker drove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakChange {
    pub change: StatusChange,
    pub breaker_name: String,
}

/// ChangeData tags the payload of one status-change node so consumers
/// pattern-match instead of downcasting. The fault-tolerance core emits
/// only `CircuitBreak`; the remaining variants belong to the sibling
/// subsystems sharing the status stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeData {
    Service(ServiceKey),
    Routing(ServiceKey),
    RateLimit(ServiceKey),
    CircuitBreak(CircuitBreakChange),
}
