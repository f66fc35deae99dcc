use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::rule::{is_match_all, FaultDetectRule, Protocol};
use crate::base::{Resource, ServiceKey};
use crate::logging;

/// Process-wide memoized compilation of rule match patterns. A pattern
/// that fails to compile is cached as `None` so the failure is logged once
/// and `match_string` degrades to literal comparison.
#[derive(Default)]
pub struct RegexCache {
    cache: Mutex<HashMap<String, Option<Arc<Regex>>>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_or_store(&self, pattern: &str) -> Option<Arc<Regex>> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(compiled) = cache.get(pattern) {
            return compiled.clone();
        }
        let compiled = match Regex::new(pattern) {
            Ok(re) => Some(Arc::new(re)),
            Err(err) => {
                logging::warn!(
                    "[FaultDetect] Fail to compile rule pattern {}, fall back to literal match, reason: {}",
                    pattern,
                    err
                );
                None
            }
        };
        cache.insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

/// Order two selector fields so that literals sort before wildcards and
/// literals compare lexicographically. More specific rules therefore come
/// first after sorting.
fn compare_string_value(v1: &str, v2: &str) -> Ordering {
    let all1 = is_match_all(v1);
    let all2 = is_match_all(v2);
    if all1 && all2 {
        return Ordering::Equal;
    }
    if all1 {
        return Ordering::Greater;
    }
    if all2 {
        return Ordering::Less;
    }
    v1.cmp(v2)
}

fn compare_service(ns1: &str, svc1: &str, ns2: &str, svc2: &str) -> Ordering {
    compare_string_value(ns1, ns2).then_with(|| compare_string_value(svc1, svc2))
}

/// Stable-sort rules by (namespace, service, method) specificity. Ties on
/// identical specificity keep their input order.
pub fn sort_rules(src_rules: &[Arc<FaultDetectRule>]) -> Vec<Arc<FaultDetectRule>> {
    let mut rules = src_rules.to_vec();
    rules.sort_by(|r1, r2| {
        let t1 = &r1.target_service;
        let t2 = &r2.target_service;
        compare_service(&t1.namespace, &t1.service, &t2.namespace, &t2.service)
            .then_with(|| compare_string_value(&t1.method, &t2.method))
    });
    rules
}

/// Service-level match: literal equality or wildcard per field.
pub fn match_service(key: &ServiceKey, namespace: &str, service: &str) -> bool {
    if !is_match_all(namespace) && namespace != key.namespace {
        return false;
    }
    if !is_match_all(service) && service != key.service {
        return false;
    }
    true
}

/// Method-level match: wildcard, literal equality, or regex compiled
/// through the cache.
pub fn match_string(value: &str, pattern: &str, regex_cache: &RegexCache) -> bool {
    if is_match_all(pattern) {
        return true;
    }
    if value == pattern {
        return true;
    }
    match regex_cache.load_or_store(pattern) {
        Some(re) => re.is_match(value),
        None => false,
    }
}

/// Select the rule governing each protocol for a resource: walk the rules
/// from most to least specific and keep the first match per protocol. An
/// empty map means no active probing for this resource.
pub fn select_rules(
    resource: &Resource,
    rules: &[Arc<FaultDetectRule>],
    regex_cache: &RegexCache,
) -> HashMap<Protocol, Arc<FaultDetectRule>> {
    let sorted_rules = sort_rules(rules);
    let mut matched: HashMap<Protocol, Arc<FaultDetectRule>> = HashMap::new();

    for rule in sorted_rules {
        let target = &rule.target_service;
        if !match_service(resource.service_key(), &target.namespace, &target.service) {
            continue;
        }
        match resource.method() {
            Some(method) => {
                if !match_string(method, &target.method, regex_cache) {
                    continue;
                }
            }
            None => {
                // methoded rules never govern non-method resources
                if !is_match_all(&target.method) {
                    continue;
                }
            }
        }
        matched.entry(rule.protocol).or_insert(rule);
    }
    matched
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::faultdetect::rule::TargetService;

    fn rule(name: &str, ns: &str, svc: &str, method: &str, protocol: Protocol) -> Arc<FaultDetectRule> {
        Arc::new(FaultDetectRule {
            name: name.into(),
            target_service: TargetService {
                namespace: ns.into(),
                service: svc.into(),
                method: method.into(),
            },
            protocol,
            ..Default::default()
        })
    }

    #[test]
    fn empty_detector_selects_nothing() {
        let res = Resource::new_service(ServiceKey::new("prod", "payments"));
        let cache = RegexCache::new();
        let selected = select_rules(&res, &[], &cache);
        assert!(selected.is_empty());
    }

    #[test]
    fn literal_wins_over_wildcard() {
        let wildcard = rule("fallback", "*", "*", "*", Protocol::Tcp);
        let literal = rule("exact", "prod", "payments", "*", Protocol::Tcp);
        let res = Resource::new_service(ServiceKey::new("prod", "payments"));
        let cache = RegexCache::new();

        // input order must not matter
        let selected = select_rules(&res, &[wildcard.clone(), literal.clone()], &cache);
        assert_eq!(selected.get(&Protocol::Tcp).unwrap().name, "exact");
        let selected = select_rules(&res, &[literal, wildcard], &cache);
        assert_eq!(selected.get(&Protocol::Tcp).unwrap().name, "exact");
    }

    #[test]
    fn one_rule_per_protocol() {
        let tcp = rule("tcp-probe", "prod", "payments", "*", Protocol::Tcp);
        let http = rule("http-probe", "prod", "payments", "*", Protocol::Http);
        let res = Resource::new_service(ServiceKey::new("prod", "payments"));
        let cache = RegexCache::new();
        let selected = select_rules(&res, &[tcp, http], &cache);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected.get(&Protocol::Tcp).unwrap().name, "tcp-probe");
        assert_eq!(selected.get(&Protocol::Http).unwrap().name, "http-probe");
    }

    #[test]
    fn methoded_rule_skips_service_resource() {
        let methoded = rule("methoded", "prod", "payments", "pay", Protocol::Tcp);
        let svc = Resource::new_service(ServiceKey::new("prod", "payments"));
        let cache = RegexCache::new();
        assert!(select_rules(&svc, &[methoded.clone()], &cache).is_empty());

        let method_res = Resource::new_method(ServiceKey::new("prod", "payments"), "pay");
        let selected = select_rules(&method_res, &[methoded], &cache);
        assert_eq!(selected.get(&Protocol::Tcp).unwrap().name, "methoded");
    }

    #[test]
    fn method_matches_by_regex() {
        let re_rule = rule("regexed", "prod", "payments", "^pay.*", Protocol::Http);
        let res = Resource::new_method(ServiceKey::new("prod", "payments"), "payAll");
        let cache = RegexCache::new();
        let selected = select_rules(&res, &[re_rule.clone()], &cache);
        assert_eq!(selected.get(&Protocol::Http).unwrap().name, "regexed");

        let res = Resource::new_method(ServiceKey::new("prod", "payments"), "refund");
        assert!(select_rules(&res, &[re_rule], &cache).is_empty());
    }

    #[test]
    fn bad_pattern_degrades_to_literal() {
        let cache = RegexCache::new();
        assert!(cache.load_or_store("([").is_none());
        // cached sentinel, second lookup stays None
        assert!(cache.load_or_store("([").is_none());
        assert!(!match_string("anything", "([", &cache));
        assert!(match_string("([", "([", &cache));
    }

    #[test]
    fn wildcard_sorts_after_literal() {
        let r1 = rule("generic", "*", "*", "*", Protocol::Tcp);
        let r2 = rule("specific", "prod", "payments", "*", Protocol::Tcp);
        let r3 = rule("half", "prod", "*", "*", Protocol::Tcp);
        let sorted = sort_rules(&[r1, r2, r3]);
        assert_eq!(sorted[0].name, "specific");
        assert_eq!(sorted[1].name, "half");
        assert_eq!(sorted[2].name, "generic");
    }
}
