//!  Circuit Breaker State Machine:
//!
//! ```text
//!                                consecutive failures reach threshold
//!
//!		+-----------------------------------------------------------------------+
//!		|                                                                       |
//!		|                                                                       v
//!	+----------------+                   +----------------+   sleep window  +----------------+
//!	|                |                   |                |<----------------|                |
//!	|                |  Probes succeed   |                |     elapsed     |                |
//!	|     Closed     |<------------------|    HalfOpen    |                 |      Open      |
//!	|                |                   |                |   Probe failed  |                |
//!	|                |                   |                +---------------->|                |
//!	+----------------+                   +----------------+                 +----------------+
//! ```
//!
//! One state machine exists per protected resource. Outcomes flow in from
//! the caller's request path and from the probe workers; every accepted
//! transition increments the resource's generation (used to fence late
//! probe results) and appends a node to the resource's status-change log,
//! which metrics sinks drain.

pub mod breaker;
pub mod composite;
pub mod status;
pub mod status_log;

pub use breaker::*;
pub use composite::*;
pub use status::*;
pub use status_log::*;
