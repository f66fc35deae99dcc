use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::breaker::{BreakerOptions, ResourceBreaker};
use super::status::{ChangeData, CircuitBreakerStatus};
use super::status_log::{DrainedChanges, StatusChangeList};
use crate::base::{InstanceResource, Resource, ResourceStat};
use crate::faultdetect::{
    select_rules, selection_signature, BreakerContext, FaultDetector, RegexCache,
    ResourceHealthChecker,
};
use crate::healthcheck::{HealthChecker, HealthCheckerRegistry};
use crate::{logging, Error, Result};

static BREAKER_NAME: &str = "composite";

/// The kernel shared between the composite breaker and its health
/// checkers: breaker state machines, policy options and the regex cache.
/// Checkers hold it only through the `BreakerContext` trait, so they never
/// reach the checker map that owns them.
struct BreakerCore {
    options: Arc<BreakerOptions>,
    regex_cache: Arc<RegexCache>,
    breakers: RwLock<HashMap<Resource, Arc<ResourceBreaker>>>,
    destroyed: AtomicBool,
}

impl BreakerCore {
    fn breaker_of(&self, resource: &Resource) -> Arc<ResourceBreaker> {
        {
            let breakers = self.breakers.read().unwrap();
            if let Some(breaker) = breakers.get(resource) {
                return Arc::clone(breaker);
            }
        }
        let mut breakers = self.breakers.write().unwrap();
        let breaker = breakers.entry(resource.clone()).or_insert_with(|| {
            Arc::new(ResourceBreaker::new(
                resource.clone(),
                BREAKER_NAME,
                Arc::clone(&self.options),
            ))
        });
        Arc::clone(breaker)
    }

    fn report_stat(&self, stat: ResourceStat) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let breaker = self.breaker_of(&stat.resource);
        breaker.on_stat(stat.ret_status, stat.generation)
    }
}

impl BreakerContext for BreakerCore {
    fn report(&self, stat: ResourceStat) {
        if let Err(err) = self.report_stat(stat) {
            logging::error!("[CircuitBreaker] fail to report probe outcome, reason: {}", err);
        }
    }

    fn check_period(&self) -> Duration {
        Duration::from_secs(self.options.check_period_sec)
    }

    fn instance_expire_interval_ms(&self) -> u64 {
        self.options.instance_expire_interval_ms
    }

    fn regex_cache(&self) -> Arc<RegexCache> {
        Arc::clone(&self.regex_cache)
    }

    fn status_generation(&self, resource: &Resource) -> u64 {
        let breakers = self.breakers.read().unwrap();
        breakers
            .get(resource)
            .map(|breaker| breaker.generation())
            .unwrap_or(0)
    }
}

/// CompositeCircuitBreaker is the fault-tolerance facade: it owns one
/// state machine and at most one health checker per resource, reacts to
/// control-plane rule and instance updates, and answers the request
/// path's `check_resource` in the common case with two map reads.
pub struct CompositeCircuitBreaker {
    core: Arc<BreakerCore>,
    health_checkers: Arc<HealthCheckerRegistry>,
    detector: RwLock<Arc<FaultDetector>>,
    checkers: Mutex<HashMap<Resource, Arc<ResourceHealthChecker>>>,
}

impl CompositeCircuitBreaker {
    pub fn builder() -> CompositeBuilder {
        CompositeBuilder::new()
    }

    fn new(options: BreakerOptions, health_checkers: HealthCheckerRegistry) -> Self {
        CompositeCircuitBreaker {
            core: Arc::new(BreakerCore {
                options: Arc::new(options),
                regex_cache: Arc::new(RegexCache::new()),
                breakers: RwLock::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
            }),
            health_checkers: Arc::new(health_checkers),
            detector: RwLock::new(Arc::new(FaultDetector::default())),
            checkers: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.destroyed.load(Ordering::SeqCst)
    }

    /// Synchronous read of a resource's breaker status for the request
    /// path. A resource nobody reported yet is Closed at generation zero.
    pub fn check_resource(&self, resource: &Resource) -> CircuitBreakerStatus {
        let breakers = self.core.breakers.read().unwrap();
        match breakers.get(resource) {
            Some(breaker) => breaker.status(),
            None => CircuitBreakerStatus::closed(BREAKER_NAME),
        }
    }

    /// Submit one outcome from the caller's request path. Instance-level
    /// outcomes also refresh the probe registry of the parent service's
    /// checker, creating the checker on first sight.
    pub fn report(&self, stat: ResourceStat) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        if let Resource::Instance(ins_res) = &stat.resource {
            self.ensure_instance(ins_res, true);
        }
        self.core.report_stat(stat)
    }

    /// Track a newly appeared instance without recording an outcome.
    pub fn register_instance(&self, ins_res: InstanceResource) {
        if self.is_destroyed() {
            return;
        }
        self.ensure_instance(&ins_res, false);
    }

    fn ensure_instance(&self, ins_res: &InstanceResource, record: bool) {
        let parent = Resource::new_service(ins_res.service.clone());
        let mut checkers = self.checkers.lock().unwrap();
        let checker = checkers.entry(parent.clone()).or_insert_with(|| {
            let detector = Arc::clone(&self.detector.read().unwrap());
            let checker = ResourceHealthChecker::new(
                parent.clone(),
                &detector,
                Arc::clone(&self.core) as Arc<dyn BreakerContext>,
                Arc::clone(&self.health_checkers),
            );
            Arc::clone(&checker).start();
            checker
        });
        checker.add_instance(ins_res, record);
    }

    /// Replace the fault-detect rule set. Checkers whose selected rules
    /// keep the same (protocol, name, interval, port, payload) identity
    /// are left running; the rest are stopped and restarted, seeded with
    /// their previous probe targets.
    pub fn update_fault_detector(&self, detector: FaultDetector) {
        if self.is_destroyed() {
            return;
        }
        let detector = Arc::new(detector);
        logging::info!(
            "[CircuitBreaker] fault detector updated, revision={}, rules={}",
            detector.revision(),
            detector.rules().len()
        );
        {
            let mut current = self.detector.write().unwrap();
            *current = Arc::clone(&detector);
        }

        let mut checkers = self.checkers.lock().unwrap();
        let resources: Vec<Resource> = checkers.keys().cloned().collect();
        for resource in resources {
            let old_checker = Arc::clone(checkers.get(&resource).unwrap());
            let new_selection =
                select_rules(&resource, detector.rules(), &self.core.regex_cache);
            if selection_signature(&new_selection) == old_checker.selection_signature() {
                continue;
            }
            logging::info!(
                "[CircuitBreaker] probe rules changed, restart health checker, resource={}",
                resource
            );
            let snapshot = old_checker.instances_snapshot();
            old_checker.stop();
            let replacement = ResourceHealthChecker::new(
                resource.clone(),
                &detector,
                Arc::clone(&self.core) as Arc<dyn BreakerContext>,
                Arc::clone(&self.health_checkers),
            );
            for ins in snapshot {
                replacement.add_instance(&ins, false);
            }
            Arc::clone(&replacement).start();
            checkers.insert(resource, replacement);
        }
    }

    /// The live status-change log of a resource, if it has one.
    pub fn status_changes(&self, resource: &Resource) -> Option<Arc<StatusChangeList>> {
        let breakers = self.core.breakers.read().unwrap();
        breakers
            .get(resource)
            .map(|breaker| Arc::clone(breaker.status_log()))
    }

    /// Detach and return a resource's pending status changes.
    pub fn drain_status_changes(&self, resource: &Resource) -> Option<DrainedChanges> {
        self.status_changes(resource).map(|log| log.drain())
    }

    /// Stop probing, wait out the grace window for worker acknowledgement
    /// and mark every status stream as ended. Destroy is sticky: later
    /// reports and updates are ignored.
    pub fn destroy(&self) {
        if self.core.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        logging::info!("[CircuitBreaker] composite circuit breaker destroying");
        let drained: Vec<(Resource, Arc<ResourceHealthChecker>)> =
            self.checkers.lock().unwrap().drain().collect();
        for (_, checker) in &drained {
            checker.stop();
        }
        let deadline =
            Instant::now() + Duration::from_millis(self.core.options.stop_grace_ms);
        for (resource, checker) in drained {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !checker.wait_stopped(remaining) {
                logging::warn!(
                    "[CircuitBreaker] abandon probe workers after grace window, resource={}",
                    resource
                );
            }
        }
        // end every status stream so consumers observe the reset
        let breakers = self.core.breakers.read().unwrap();
        for (resource, breaker) in breakers.iter() {
            breaker
                .status_log()
                .append_deleted(ChangeData::Service(resource.service_key().clone()));
        }
    }
}

/// Builder assembling the composite breaker. Health-check plugins are
/// registered here and frozen once `build` returns.
pub struct CompositeBuilder {
    options: Option<BreakerOptions>,
    health_checkers: HealthCheckerRegistry,
}

impl Default for CompositeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeBuilder {
    pub fn new() -> Self {
        CompositeBuilder {
            options: None,
            health_checkers: HashMap::new(),
        }
    }

    /// Override the policy options; without this the global configuration
    /// is used.
    pub fn with_options(mut self, options: BreakerOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_health_checker(mut self, checker: Arc<dyn HealthChecker>) -> Self {
        let protocol = checker.protocol();
        if let Some(replaced) = self.health_checkers.insert(protocol, checker) {
            logging::warn!(
                "[CircuitBreaker] replace health checker for protocol={}, previous={}",
                protocol,
                replaced.name()
            );
        }
        self
    }

    pub fn build(self) -> Result<CompositeCircuitBreaker> {
        let options = self
            .options
            .unwrap_or_else(BreakerOptions::from_global_config);
        check_options(&options)?;
        Ok(CompositeCircuitBreaker::new(options, self.health_checkers))
    }
}

fn check_options(options: &BreakerOptions) -> Result<()> {
    if options.check_period_sec < 1 {
        return Err(Error::msg("illegal breaker options: check_period_sec < 1"));
    }
    if options.error_threshold == 0 {
        return Err(Error::msg("illegal breaker options: error_threshold == 0"));
    }
    if options.success_threshold_half_open == 0 {
        return Err(Error::msg(
            "illegal breaker options: success_threshold_half_open == 0",
        ));
    }
    if options.sleep_window_ms == 0 {
        return Err(Error::msg("illegal breaker options: sleep_window_ms == 0"));
    }
    if options.instance_expire_interval_ms == 0 {
        return Err(Error::msg(
            "illegal breaker options: instance_expire_interval_ms == 0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::{Node, RetStatus, ServiceKey};
    use crate::circuitbreaker::status::{Status, StatusChange};
    use crate::faultdetect::rule::{FaultDetectRule, Protocol, TargetService};
    use crate::utils;

    fn test_options() -> BreakerOptions {
        BreakerOptions {
            sleep_window_ms: 10,
            error_threshold: 3,
            success_threshold_half_open: 2,
            check_period_sec: 1,
            instance_expire_interval_ms: 60_000,
            stop_grace_ms: 1_000,
        }
    }

    fn composite() -> CompositeCircuitBreaker {
        CompositeCircuitBreaker::builder()
            .with_options(test_options())
            .build()
            .unwrap()
    }

    fn service_resource() -> Resource {
        Resource::new_service(ServiceKey::new("prod", "payments"))
    }

    fn stat(resource: Resource, ret_status: RetStatus) -> ResourceStat {
        ResourceStat::new(resource, "0", Duration::from_millis(2), ret_status)
    }

    fn wildcard_rule(name: &str, interval_sec: u32) -> Arc<FaultDetectRule> {
        Arc::new(FaultDetectRule {
            name: name.into(),
            target_service: TargetService {
                namespace: "*".into(),
                service: "*".into(),
                method: "*".into(),
            },
            protocol: Protocol::Tcp,
            interval_sec,
            ..Default::default()
        })
    }

    #[test]
    fn invalid_options_abort_build() {
        let result = CompositeCircuitBreaker::builder()
            .with_options(BreakerOptions {
                error_threshold: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn unknown_resource_reads_closed() {
        let cb = composite();
        let status = cb.check_resource(&service_resource());
        assert_eq!(status.status, Status::Closed);
        assert_eq!(status.generation, 0);
        assert!(status.is_available());
    }

    #[test]
    fn reports_drive_the_breaker() {
        let cb = composite();
        let res = service_resource();
        for _ in 0..3 {
            cb.report(stat(res.clone(), RetStatus::Fail)).unwrap();
        }
        let status = cb.check_resource(&res);
        assert_eq!(status.status, Status::Open);
        assert!(!status.is_available());

        let drained = cb.drain_status_changes(&res).unwrap();
        assert_eq!(drained.count, 1);
        match &drained.nodes[0].data {
            ChangeData::CircuitBreak(cb_change) => {
                assert_eq!(cb_change.change, StatusChange::CloseToOpen);
                assert_eq!(cb_change.breaker_name, "composite");
            }
            other => panic!("unexpected change data {:?}", other),
        }
    }

    #[test]
    fn instance_report_registers_probe_target() {
        let cb = composite();
        let ins = Resource::new_instance(
            ServiceKey::new("prod", "payments"),
            Node::new("10.0.0.1", 80),
            "tcp",
        );
        cb.report(stat(ins, RetStatus::Success)).unwrap();

        {
            let checkers = cb.checkers.lock().unwrap();
            let checker = checkers.get(&service_resource()).expect("parent checker");
            assert_eq!(checker.instance_count(), 1);
            assert!(checker.instance("10.0.0.1:80").is_some());
        }
        cb.destroy();
    }

    #[test]
    fn register_instance_does_not_touch_the_breaker() {
        let cb = composite();
        cb.register_instance(InstanceResource {
            service: ServiceKey::new("prod", "payments"),
            node: Node::new("10.0.0.1", 80),
            protocol: "tcp".into(),
        });
        assert_eq!(cb.check_resource(&service_resource()).generation, 0);
        {
            let checkers = cb.checkers.lock().unwrap();
            assert_eq!(
                checkers.get(&service_resource()).unwrap().instance_count(),
                1
            );
        }
        cb.destroy();
    }

    #[test]
    fn at_most_one_checker_per_resource() {
        let cb = composite();
        for port in [80, 81, 82] {
            cb.register_instance(InstanceResource {
                service: ServiceKey::new("prod", "payments"),
                node: Node::new("10.0.0.1", port),
                protocol: "tcp".into(),
            });
        }
        {
            let checkers = cb.checkers.lock().unwrap();
            assert_eq!(checkers.len(), 1);
            assert_eq!(
                checkers.get(&service_resource()).unwrap().instance_count(),
                3
            );
        }
        cb.destroy();
    }

    #[test]
    fn unchanged_rules_keep_the_checker() {
        let cb = composite();
        cb.update_fault_detector(FaultDetector::new(vec![wildcard_rule("probe", 1)], "rev-1"));
        cb.register_instance(InstanceResource {
            service: ServiceKey::new("prod", "payments"),
            node: Node::new("10.0.0.1", 80),
            protocol: "tcp".into(),
        });
        let before = {
            let checkers = cb.checkers.lock().unwrap();
            Arc::clone(checkers.get(&service_resource()).unwrap())
        };

        cb.update_fault_detector(FaultDetector::new(vec![wildcard_rule("probe", 1)], "rev-2"));
        let after = {
            let checkers = cb.checkers.lock().unwrap();
            Arc::clone(checkers.get(&service_resource()).unwrap())
        };
        assert!(Arc::ptr_eq(&before, &after));
        cb.destroy();
    }

    #[test]
    fn changed_rules_restart_the_checker_with_instances() {
        let cb = composite();
        cb.update_fault_detector(FaultDetector::new(vec![wildcard_rule("probe", 1)], "rev-1"));
        cb.register_instance(InstanceResource {
            service: ServiceKey::new("prod", "payments"),
            node: Node::new("10.0.0.1", 80),
            protocol: "tcp".into(),
        });
        let before = {
            let checkers = cb.checkers.lock().unwrap();
            Arc::clone(checkers.get(&service_resource()).unwrap())
        };

        cb.update_fault_detector(FaultDetector::new(vec![wildcard_rule("probe", 2)], "rev-2"));
        let after = {
            let checkers = cb.checkers.lock().unwrap();
            Arc::clone(checkers.get(&service_resource()).unwrap())
        };
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(before.is_stopped());
        assert_eq!(after.instance_count(), 1, "probe targets survive the reload");
        cb.destroy();
    }

    #[test]
    fn destroy_is_sticky_and_ends_streams() {
        let cb = composite();
        let res = service_resource();
        for _ in 0..3 {
            cb.report(stat(res.clone(), RetStatus::Fail)).unwrap();
        }
        cb.destroy();
        cb.destroy();

        // stream carries the transition plus the deleted marker, seq reset
        let drained = cb.drain_status_changes(&res).unwrap();
        assert_eq!(drained.count, 2);
        assert_eq!(drained.seq, 0);
        assert!(matches!(drained.nodes[1].data, ChangeData::Service(_)));

        // reports after destroy change nothing
        cb.report(stat(res.clone(), RetStatus::Success)).unwrap();
        assert_eq!(cb.check_resource(&res).status, Status::Open);
    }

    #[test]
    fn sleep_window_then_recovery_closes_again() {
        let cb = composite();
        let res = service_resource();
        for _ in 0..3 {
            cb.report(stat(res.clone(), RetStatus::Fail)).unwrap();
        }
        assert_eq!(cb.check_resource(&res).status, Status::Open);

        utils::sleep_for_ms(20);
        cb.report(stat(res.clone(), RetStatus::Success)).unwrap();
        assert_eq!(cb.check_resource(&res).status, Status::HalfOpen);
        cb.report(stat(res.clone(), RetStatus::Success)).unwrap();
        assert_eq!(cb.check_resource(&res).status, Status::Closed);

        let changes: Vec<StatusChange> = cb
            .drain_status_changes(&res)
            .unwrap()
            .nodes
            .into_iter()
            .map(|n| match n.data {
                ChangeData::CircuitBreak(c) => c.change,
                other => panic!("unexpected change data {:?}", other),
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                StatusChange::CloseToOpen,
                StatusChange::OpenToHalfOpen,
                StatusChange::HalfOpenToClose,
            ]
        );
    }
}
