use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::config::DEFAULT_DETECT_INTERVAL_SEC;
use crate::{logging, Error, Result};

/// Probe protocol of a fault-detect rule or an instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Unknown,
    Http,
    Tcp,
    Udp,
}

impl Default for Protocol {
    fn default() -> Protocol {
        Protocol::Unknown
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Unknown => "unknown",
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        write!(f, "{}", s)
    }
}

/// Parse the protocol string an instance advertises. Compound strings such
/// as `"grpc/http"` resolve to the probe protocol they carry.
pub fn parse_protocol(s: &str) -> Protocol {
    let s = s.to_lowercase();
    if s == "http" || s.starts_with("http/") || s.ends_with("/http") {
        return Protocol::Http;
    }
    if s == "udp" || s.starts_with("udp/") || s.ends_with("/udp") {
        return Protocol::Udp;
    }
    if s == "tcp" || s.starts_with("tcp/") || s.ends_with("/tcp") {
        return Protocol::Tcp;
    }
    Protocol::Unknown
}

/// The match-all wildcard in rule selectors.
pub const MATCH_ALL: &str = "*";

pub fn is_match_all(v: &str) -> bool {
    v.is_empty() || v == MATCH_ALL
}

/// TargetService selects the resources a rule governs. Each field is a
/// literal, a regex, or the `*` wildcard.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetService {
    pub namespace: String,
    pub service: String,
    pub method: String,
}

/// FaultDetectRule pairs a resource selector with a probe protocol and
/// cadence.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultDetectRule {
    /// rule name, for logging only
    pub name: String,
    pub target_service: TargetService,
    pub protocol: Protocol,
    /// probe period in seconds; 0 falls back to the default of 10
    pub interval_sec: u32,
    /// 0 uses the instance's own port; >0 overrides it for every instance
    /// under this rule
    pub port: u32,
    /// protocol-specific payload consumed opaquely by the probe plugin
    pub payload: String,
}

impl FaultDetectRule {
    pub fn interval(&self) -> u32 {
        if self.interval_sec > 0 {
            self.interval_sec
        } else {
            DEFAULT_DETECT_INTERVAL_SEC
        }
    }

    /// Hash of the opaque payload, part of the checker restart signature.
    pub fn payload_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.payload.hash(&mut hasher);
        hasher.finish()
    }

    pub fn is_valid(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::msg("empty rule name"));
        }
        let target = &self.target_service;
        if target.namespace.is_empty() && target.service.is_empty() && target.method.is_empty() {
            return Err(Error::msg("empty target selector"));
        }
        Ok(())
    }
}

impl fmt::Display for FaultDetectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmtted = serde_json::to_string(self).unwrap();
        write!(f, "{}", fmtted)
    }
}

/// FaultDetector is the full rule set pushed by the control plane,
/// replaced atomically on every delivery. Invalid rules are dropped with a
/// warning; control-plane data is never fatal.
#[derive(Debug, Default, Clone)]
pub struct FaultDetector {
    rules: Vec<Arc<FaultDetectRule>>,
    revision: String,
}

impl FaultDetector {
    pub fn new(rules: Vec<Arc<FaultDetectRule>>, revision: impl Into<String>) -> Self {
        let mut valid_rules = Vec::with_capacity(rules.len());
        for rule in rules {
            match rule.is_valid() {
                Ok(_) => valid_rules.push(rule),
                Err(err) => logging::warn!(
                    "[FaultDetect] Ignoring invalid fault detect rule {}, reason: {:?}",
                    rule,
                    err
                ),
            }
        }
        FaultDetector {
            rules: valid_rules,
            revision: revision.into(),
        }
    }

    pub fn rules(&self) -> &[Arc<FaultDetectRule>] {
        &self.rules
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }
}
