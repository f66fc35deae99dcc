//! Fault detection: operator-authored probe rules, their selection per
//! resource, and the per-resource health checkers that schedule probes
//! against live instances.

pub mod checker;
pub mod matcher;
pub mod rule;

pub use checker::*;
pub use matcher::*;
pub use rule::*;
