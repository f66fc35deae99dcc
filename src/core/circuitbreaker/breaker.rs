use std::sync::{Arc, Mutex};

use super::status::{ChangeData, CircuitBreakChange, CircuitBreakerStatus, Status, StatusChange};
use super::status_log::StatusChangeList;
use crate::base::{Resource, RetStatus};
use crate::config;
use crate::{logging, utils, Result};

/// BreakerOptions carries the policy knobs of the fault-tolerance core.
/// They are resolved once (from global config or by hand in tests) and
/// shared read-only by every breaker and checker.
#[derive(Debug, Clone)]
pub struct BreakerOptions {
    /// how long an Open breaker gates traffic before admitting recovery
    pub sleep_window_ms: u64,
    /// consecutive failures that trip a Closed breaker
    pub error_threshold: u32,
    /// consecutive successes that close a HalfOpen breaker
    pub success_threshold_half_open: u32,
    /// expiry-worker tick for non-instance resources
    pub check_period_sec: u64,
    /// TTL for silent and failing probe targets
    pub instance_expire_interval_ms: u64,
    /// bounded wait for worker acknowledgement on shutdown
    pub stop_grace_ms: u64,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        BreakerOptions {
            sleep_window_ms: config::DEFAULT_SLEEP_WINDOW_MS,
            error_threshold: config::DEFAULT_ERROR_THRESHOLD,
            success_threshold_half_open: config::DEFAULT_SUCCESS_THRESHOLD_HALF_OPEN,
            check_period_sec: config::DEFAULT_CHECK_PERIOD_SEC,
            instance_expire_interval_ms: config::DEFAULT_INSTANCE_EXPIRE_INTERVAL_MS,
            stop_grace_ms: config::DEFAULT_STOP_GRACE_MS,
        }
    }
}

impl BreakerOptions {
    /// Resolve the options from the global configuration.
    pub fn from_global_config() -> Self {
        BreakerOptions {
            sleep_window_ms: config::sleep_window_ms(),
            error_threshold: config::error_threshold(),
            success_threshold_half_open: config::success_threshold_half_open(),
            check_period_sec: config::check_period_sec(),
            instance_expire_interval_ms: config::instance_expire_interval_ms(),
            stop_grace_ms: config::stop_grace_ms(),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    status: Status,
    since_ms: u64,
    generation: u64,
    consecutive_errors: u32,
    half_open_successes: u32,
}

/// ResourceBreaker is the state machine of one protected resource. All
/// transitions serialize through its mutex; readers get a copy of the
/// current status. Accepted transitions bump the generation, stamp
/// `since_ms` and append to the resource's status-change log.
pub struct ResourceBreaker {
    resource: Resource,
    name: String,
    options: Arc<BreakerOptions>,
    inner: Mutex<BreakerInner>,
    status_log: Arc<StatusChangeList>,
}

impl ResourceBreaker {
    pub fn new(resource: Resource, name: impl Into<String>, options: Arc<BreakerOptions>) -> Self {
        ResourceBreaker {
            resource,
            name: name.into(),
            options,
            inner: Mutex::new(BreakerInner::default()),
            status_log: Arc::new(StatusChangeList::new()),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn status_log(&self) -> &Arc<StatusChangeList> {
        &self.status_log
    }

    /// Copy-on-read snapshot of the current status.
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock().unwrap();
        CircuitBreakerStatus {
            breaker_name: self.name.clone(),
            status: inner.status,
            since_ms: inner.since_ms,
            generation: inner.generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }

    /// Feed one outcome through the state machine. `generation` is the
    /// fencing token read before a probe started; outcomes older than the
    /// breaker's current generation are dropped.
    pub fn on_stat(&self, ret_status: RetStatus, generation: Option<u64>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(g) = generation {
            if g < inner.generation {
                logging::debug!(
                    "[CircuitBreaker] drop stale probe outcome, resource={}, probe generation={}, current={}",
                    self.resource,
                    g,
                    inner.generation
                );
                return Ok(());
            }
        }
        let success = ret_status.is_success();
        match inner.status {
            Status::Closed => {
                if success {
                    inner.consecutive_errors = 0;
                } else {
                    inner.consecutive_errors += 1;
                    if inner.consecutive_errors >= self.options.error_threshold {
                        self.transition(&mut inner, Status::Open)?;
                    }
                }
            }
            Status::Open => {
                let now = utils::curr_time_millis();
                if now.saturating_sub(inner.since_ms) >= self.options.sleep_window_ms {
                    self.transition(&mut inner, Status::HalfOpen)?;
                    self.apply_half_open(&mut inner, success)?;
                }
                // outcomes inside the sleep window carry no information:
                // traffic is gated and recovery is not yet admitted
            }
            Status::HalfOpen => self.apply_half_open(&mut inner, success)?,
        }
        Ok(())
    }

    fn apply_half_open(&self, inner: &mut BreakerInner, success: bool) -> Result<()> {
        if success {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.options.success_threshold_half_open {
                self.transition(inner, Status::Closed)?;
            }
        } else {
            self.transition(inner, Status::Open)?;
        }
        Ok(())
    }

    fn transition(&self, inner: &mut BreakerInner, to: Status) -> Result<()> {
        let change = match StatusChange::for_transition(inner.status, to) {
            Ok(change) => change,
            Err(err) => {
                logging::warn!(
                    "[CircuitBreaker] refuse transition, resource={}, reason: {}",
                    self.resource,
                    err
                );
                return Err(err);
            }
        };
        inner.status = to;
        inner.generation += 1;
        inner.since_ms = utils::curr_time_millis();
        inner.consecutive_errors = 0;
        inner.half_open_successes = 0;
        self.status_log.append(ChangeData::CircuitBreak(CircuitBreakChange {
            change,
            breaker_name: self.name.clone(),
        }));
        logging::info!(
            "[CircuitBreaker] resource={} {} by breaker={}, generation={}",
            self.resource,
            change,
            self.name,
            inner.generation
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::ServiceKey;

    fn test_options(sleep_window_ms: u64) -> Arc<BreakerOptions> {
        Arc::new(BreakerOptions {
            sleep_window_ms,
            error_threshold: 3,
            success_threshold_half_open: 2,
            ..Default::default()
        })
    }

    fn breaker(sleep_window_ms: u64) -> ResourceBreaker {
        ResourceBreaker::new(
            Resource::new_service(ServiceKey::new("prod", "payments")),
            "composite",
            test_options(sleep_window_ms),
        )
    }

    fn drained_changes(breaker: &ResourceBreaker) -> Vec<StatusChange> {
        breaker
            .status_log()
            .drain()
            .nodes
            .into_iter()
            .map(|n| match n.data {
                ChangeData::CircuitBreak(cb) => cb.change,
                other => panic!("unexpected change data {:?}", other),
            })
            .collect()
    }

    #[test]
    fn trips_open_after_consecutive_failures() {
        let b = breaker(30_000);
        b.on_stat(RetStatus::Fail, None).unwrap();
        b.on_stat(RetStatus::Timeout, None).unwrap();
        assert_eq!(b.status().status, Status::Closed);
        b.on_stat(RetStatus::Fail, None).unwrap();
        assert_eq!(b.status().status, Status::Open);
        assert_eq!(b.generation(), 1);
        assert_eq!(drained_changes(&b), vec![StatusChange::CloseToOpen]);
    }

    #[test]
    fn success_resets_the_error_run() {
        let b = breaker(30_000);
        b.on_stat(RetStatus::Fail, None).unwrap();
        b.on_stat(RetStatus::Fail, None).unwrap();
        b.on_stat(RetStatus::Success, None).unwrap();
        b.on_stat(RetStatus::Fail, None).unwrap();
        b.on_stat(RetStatus::Fail, None).unwrap();
        assert_eq!(b.status().status, Status::Closed);
    }

    #[test]
    fn outcomes_inside_sleep_window_are_dropped() {
        let b = breaker(60_000);
        for _ in 0..3 {
            b.on_stat(RetStatus::Fail, None).unwrap();
        }
        assert_eq!(b.status().status, Status::Open);
        b.on_stat(RetStatus::Success, None).unwrap();
        assert_eq!(b.status().status, Status::Open, "sleep window still holds");
        assert_eq!(b.generation(), 1);
    }

    #[test]
    fn recovers_through_half_open() {
        let b = breaker(10);
        for _ in 0..3 {
            b.on_stat(RetStatus::Fail, None).unwrap();
        }
        assert_eq!(b.status().status, Status::Open);

        utils::sleep_for_ms(20);
        b.on_stat(RetStatus::Success, None).unwrap();
        assert_eq!(b.status().status, Status::HalfOpen);
        b.on_stat(RetStatus::Success, None).unwrap();
        assert_eq!(b.status().status, Status::Closed);

        assert_eq!(
            drained_changes(&b),
            vec![
                StatusChange::CloseToOpen,
                StatusChange::OpenToHalfOpen,
                StatusChange::HalfOpenToClose,
            ]
        );
        assert_eq!(b.generation(), 3);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = breaker(10);
        for _ in 0..3 {
            b.on_stat(RetStatus::Fail, None).unwrap();
        }
        utils::sleep_for_ms(20);
        b.on_stat(RetStatus::Success, None).unwrap();
        assert_eq!(b.status().status, Status::HalfOpen);
        b.on_stat(RetStatus::Fail, None).unwrap();
        assert_eq!(b.status().status, Status::Open);
        assert_eq!(
            drained_changes(&b),
            vec![
                StatusChange::CloseToOpen,
                StatusChange::OpenToHalfOpen,
                StatusChange::HalfOpenToOpen,
            ]
        );
    }

    #[test]
    fn stale_probe_generation_is_fenced() {
        let b = breaker(10);
        let pre_probe_generation = b.generation();
        // the resource moves on while the probe is in flight
        for _ in 0..3 {
            b.on_stat(RetStatus::Fail, None).unwrap();
        }
        assert_eq!(b.generation(), 1);
        utils::sleep_for_ms(20);

        // late success from generation 0 must not drive Open -> HalfOpen
        b.on_stat(RetStatus::Success, Some(pre_probe_generation))
            .unwrap();
        assert_eq!(b.status().status, Status::Open);
        assert_eq!(drained_changes(&b), vec![StatusChange::CloseToOpen]);

        // a current-generation outcome still does
        b.on_stat(RetStatus::Success, Some(b.generation())).unwrap();
        assert_eq!(b.status().status, Status::HalfOpen);
    }
}
