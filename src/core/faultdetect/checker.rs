use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use super::matcher::{select_rules, RegexCache};
use super::rule::{parse_protocol, FaultDetectRule, FaultDetector, Protocol};
use crate::base::{InstanceResource, Resource, ResourceLevel, ResourceStat};
use crate::healthcheck::{DetectTarget, HealthCheckerRegistry};
use crate::utils::{self, CancellationToken, WaitGroup};
use crate::logging;

/// The restricted view of the composite breaker a checker is allowed to
/// touch: outcome reporting, the scheduling knobs and the shared regex
/// cache. Keeping the seam this narrow breaks the reference cycle between
/// checkers and the composite that owns them.
pub trait BreakerContext: Send + Sync {
    fn report(&self, stat: ResourceStat);

    fn check_period(&self) -> Duration;

    fn instance_expire_interval_ms(&self) -> u64;

    fn regex_cache(&self) -> Arc<RegexCache>;

    /// Current breaker generation of a resource, read before a probe
    /// starts so the outcome can be fenced if the resource moves on.
    fn status_generation(&self, resource: &Resource) -> u64;
}

/// Identity of one checker's selected rule set. A checker is restarted
/// only when this signature changes.
pub type SelectionSignature = BTreeMap<Protocol, (String, u32, u32, u64)>;

/// ProtocolInstance is the runtime view of one probe target inside a
/// checker: its parsed protocol, the freshness of caller reports and the
/// last probe verdict. The hot fields are atomics so the request path and
/// the probe workers never contend on a lock.
pub struct ProtocolInstance {
    protocol: Protocol,
    ins_res: InstanceResource,
    last_report_milli: AtomicI64,
    check_success: AtomicBool,
}

impl ProtocolInstance {
    fn new(protocol: Protocol, ins_res: InstanceResource) -> Self {
        ProtocolInstance {
            protocol,
            ins_res,
            last_report_milli: AtomicI64::new(utils::curr_time_millis() as i64),
            check_success: AtomicBool::new(false),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn resource(&self) -> &InstanceResource {
        &self.ins_res
    }

    pub fn last_report_milli(&self) -> i64 {
        self.last_report_milli.load(Ordering::SeqCst)
    }

    pub fn is_check_success(&self) -> bool {
        self.check_success.load(Ordering::SeqCst)
    }

    pub fn set_check_result(&self, success: bool) {
        self.check_success.store(success, Ordering::SeqCst);
    }

    pub fn do_report(&self) {
        self.last_report_milli
            .store(utils::curr_time_millis() as i64, Ordering::SeqCst);
    }
}

/// ResourceHealthChecker runs the active probing of one protected
/// resource: a worker per selected (protocol, rule) pair plus, for
/// non-instance resources, an expiry worker that garbage-collects probe
/// targets nobody reports anymore.
pub struct ResourceHealthChecker {
    resource: Resource,
    selection: HashMap<Protocol, Arc<FaultDetectRule>>,
    context: Arc<dyn BreakerContext>,
    health_checkers: Arc<HealthCheckerRegistry>,
    stopped: AtomicBool,
    token: CancellationToken,
    workers: WaitGroup,
    instances: RwLock<HashMap<String, Arc<ProtocolInstance>>>,
    missing_plugins_logged: Mutex<HashSet<Protocol>>,
}

impl ResourceHealthChecker {
    pub fn new(
        resource: Resource,
        detector: &FaultDetector,
        context: Arc<dyn BreakerContext>,
        health_checkers: Arc<HealthCheckerRegistry>,
    ) -> Arc<Self> {
        let regex_cache = context.regex_cache();
        let selection = select_rules(&resource, detector.rules(), &regex_cache);
        let checker = Arc::new(ResourceHealthChecker {
            resource,
            selection,
            context,
            health_checkers,
            stopped: AtomicBool::new(false),
            token: CancellationToken::new(),
            workers: WaitGroup::new(),
            instances: RwLock::new(HashMap::new()),
            missing_plugins_logged: Mutex::new(HashSet::new()),
        });
        if let Resource::Instance(ins_res) = checker.resource.clone() {
            checker.add_instance(&ins_res, false);
        }
        checker
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn selection(&self) -> &HashMap<Protocol, Arc<FaultDetectRule>> {
        &self.selection
    }

    pub fn selection_signature(&self) -> SelectionSignature {
        selection_signature(&self.selection)
    }

    /// Spawn the probe workers and, for non-instance resources, the expiry
    /// worker. Each worker sleeps one period between ticks and exits as
    /// soon as the cancellation token fires.
    pub fn start(self: Arc<Self>) {
        for (protocol, rule) in self.selection.clone() {
            let interval = Duration::from_secs(rule.interval() as u64);
            logging::info!(
                "[FaultDetect] schedule probe task: resource={}, protocol={}, interval={:?}, rule={}",
                self.resource,
                protocol,
                interval,
                rule.name
            );
            let checker = Arc::clone(&self);
            self.workers.add(1);
            thread::spawn(move || {
                while !checker.token.wait_timeout(interval) {
                    checker.check_once(protocol, &rule);
                }
                checker.workers.done();
            });
        }
        if self.resource.level() != ResourceLevel::Instance {
            let check_period = self.context.check_period();
            logging::info!(
                "[FaultDetect] schedule expire task: resource={}, interval={:?}",
                self.resource,
                check_period
            );
            let checker = Arc::clone(&self);
            self.workers.add(1);
            thread::spawn(move || {
                while !checker.token.wait_timeout(check_period) {
                    checker.clean_instances();
                }
                checker.workers.done();
            });
        }
    }

    /// Signal every worker and flip the sticky stop flag consulted at the
    /// top of each tick, so in-flight work short-circuits.
    pub fn stop(&self) {
        logging::info!(
            "[FaultDetect] health checker for resource={} has stopped",
            self.resource
        );
        self.stopped.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    /// Wait for worker acknowledgement within the grace window. Returns
    /// `false` when workers had to be abandoned; the stop flag already
    /// suppresses any effect they could still have.
    pub fn wait_stopped(&self, grace: Duration) -> bool {
        self.workers.wait_timeout(grace)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Track a probe target. An existing entry is never rewritten; a
    /// repeated sighting with `record` only refreshes the report
    /// timestamp.
    pub fn add_instance(&self, res: &InstanceResource, record: bool) {
        let key = res.node.to_string();
        let mut instances = self.instances.write().unwrap();
        match instances.get(&key) {
            None => {
                instances.insert(
                    key,
                    Arc::new(ProtocolInstance::new(
                        parse_protocol(&res.protocol),
                        res.clone(),
                    )),
                );
            }
            Some(saved) => {
                if record {
                    saved.do_report();
                }
            }
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().unwrap().len()
    }

    pub fn instance(&self, node_key: &str) -> Option<Arc<ProtocolInstance>> {
        self.instances.read().unwrap().get(node_key).cloned()
    }

    /// Copy of the tracked instance resources, used to seed a replacement
    /// checker across a rule reload.
    pub fn instances_snapshot(&self) -> Vec<InstanceResource> {
        self.instances
            .read()
            .unwrap()
            .values()
            .map(|ins| ins.resource().clone())
            .collect()
    }

    /// Drop every instance that is failing its probes and has not been
    /// reported within the TTL. Instances with a successful last probe are
    /// kept: they are actively confirmed live even if the caller went
    /// quiet.
    pub fn clean_instances(&self) {
        let curr_time_milli = utils::curr_time_millis() as i64;
        let expire_interval_milli = self.context.instance_expire_interval_ms() as i64;

        let mut wait_del = Vec::new();
        {
            let instances = self.instances.read().unwrap();
            for (key, ins) in instances.iter() {
                if ins.is_check_success() {
                    continue;
                }
                let last_report_milli = ins.last_report_milli();
                if curr_time_milli - last_report_milli >= expire_interval_milli {
                    wait_del.push(key.clone());
                    logging::info!(
                        "[FaultDetect] clean instance from probe tasks, resource={}, expired node={}, lastReportMilli={}",
                        self.resource,
                        key,
                        last_report_milli
                    );
                }
            }
        }
        if wait_del.is_empty() {
            return;
        }
        let mut instances = self.instances.write().unwrap();
        for key in wait_del {
            instances.remove(&key);
        }
    }

    fn check_once(&self, protocol: Protocol, rule: &FaultDetectRule) {
        if self.is_stopped() {
            return;
        }
        // targets are copied out so no probe runs under the registry lock
        for (target, instance) in self.collect_targets(protocol, rule) {
            if self.is_stopped() {
                return;
            }
            let generation = self.context.status_generation(&self.resource);
            let success = self.do_check(&target, rule, generation);
            instance.set_check_result(success);
        }
    }

    /// Resolve the probe targets of one tick under the read lock:
    /// instances whose protocol is Unknown or matches the rule, probed at
    /// the rule's port when it overrides, else at their own. Overridden
    /// targets are deduplicated.
    fn collect_targets(
        &self,
        protocol: Protocol,
        rule: &FaultDetectRule,
    ) -> Vec<(DetectTarget, Arc<ProtocolInstance>)> {
        let instances = self.instances.read().unwrap();
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(instances.len());
        for ins in instances.values() {
            let cur_protocol = ins.protocol();
            if !(cur_protocol == Protocol::Unknown || cur_protocol == protocol) {
                continue;
            }
            let node = &ins.resource().node;
            let port = if rule.port > 0 { rule.port } else { node.port };
            let target = DetectTarget {
                host: node.host.clone(),
                port,
            };
            if rule.port > 0 && !seen.insert(target.clone()) {
                continue;
            }
            targets.push((target, Arc::clone(ins)));
        }
        targets
    }

    fn do_check(&self, target: &DetectTarget, rule: &FaultDetectRule, generation: u64) -> bool {
        let plugin = match self.health_checkers.get(&rule.protocol) {
            Some(plugin) => Arc::clone(plugin),
            None => {
                let mut logged = self.missing_plugins_logged.lock().unwrap();
                if logged.insert(rule.protocol) {
                    logging::info!(
                        "[FaultDetect] plugin not found, skip probes: resource={}, protocol={}",
                        self.resource,
                        rule.protocol
                    );
                }
                return false;
            }
        };
        match plugin.detect_instance(target, rule, probe_deadline(rule)) {
            Ok(ret) => {
                let success = ret.ret_status.is_success();
                if self.is_stopped() {
                    // shutdown during probe: the outcome is discarded
                    return success;
                }
                let stat = ResourceStat::new(
                    self.resource.clone(),
                    ret.code,
                    ret.delay,
                    ret.ret_status,
                )
                .with_generation(generation);
                self.context.report(stat);
                success
            }
            Err(err) => {
                // probe could not run: indeterminate, nothing reported
                logging::debug!(
                    "[FaultDetect] probe error, resource={}, target={}:{}, reason: {}",
                    self.resource,
                    target.host,
                    target.port,
                    err
                );
                false
            }
        }
    }
}

/// Per-probe deadline: the rule's period minus scheduler overhead, never
/// below one second.
fn probe_deadline(rule: &FaultDetectRule) -> Duration {
    Duration::from_secs(rule.interval().saturating_sub(1).max(1) as u64)
}

pub fn selection_signature(
    selection: &HashMap<Protocol, Arc<FaultDetectRule>>,
) -> SelectionSignature {
    selection
        .iter()
        .map(|(protocol, rule)| {
            (
                *protocol,
                (
                    rule.name.clone(),
                    rule.interval(),
                    rule.port,
                    rule.payload_hash(),
                ),
            )
        })
        .collect()
}
