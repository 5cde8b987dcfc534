// src/core/inhibit/mod.rs

//! The inhibition engine: suppresses alerts that match a rule's target matchers
//! while a distinct, correlated source alert is firing.
//!
//! "Correlated" means the source and target share equal values for every label
//! named in the rule's `equal` list (the rule's own source/target matchers are
//! free to pin that same label to two different required values, as in the
//! canonical `severity=critical` source / `severity=warning` target example).
//! Answering that requires searching currently-firing alerts for one that
//! matches the source side and agrees with the target on the `equal` tuple, so
//! a positive result is cached briefly per `(rule, equal-tuple)` to keep a
//! bursty target from re-scanning the store on every dispatch tick.

use crate::core::model::{InhibitRule, Labels};
use crate::core::store::AlertStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(15);

/// Answers whether a given target label set is presently inhibited by any
/// configured rule.
pub struct Inhibitor {
    rules: Vec<InhibitRule>,
    store: Arc<AlertStore>,
    /// Caches only positive matches; a miss is never cached, since misses are
    /// exactly what a newly-firing source alert needs to invalidate.
    cache: RwLock<HashMap<(usize, Vec<String>), Instant>>,
}

impl Inhibitor {
    pub fn new(rules: Vec<InhibitRule>, store: Arc<AlertStore>) -> Self {
        Self {
            rules,
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// True if `target_labels` (belonging to the alert identified by
    /// `target_fingerprint`) should be suppressed by any rule with a
    /// currently-firing, correlated source alert elsewhere in the store.
    pub fn is_inhibited(&self, target_fingerprint: u64, target_labels: &Labels) -> bool {
        for (idx, rule) in self.rules.iter().enumerate() {
            if !rule.target_matches(target_labels) {
                continue;
            }

            let equal_tuple = rule.equal_tuple(target_labels);
            let cache_key = (idx, equal_tuple.clone());
            if let Some(seen_at) = self.cache.read().get(&cache_key).copied()
                && seen_at.elapsed() < CACHE_TTL
            {
                return true;
            }

            let correlated = self.store.firing().into_iter().any(|source| {
                source.alert.fingerprint() != target_fingerprint
                    && rule.source_matches(&source.alert.labels)
                    && rule.equal_tuple(&source.alert.labels) == equal_tuple
            });
            if correlated {
                self.cache.write().insert(cache_key, Instant::now());
                return true;
            }
        }
        false
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

pub type SharedInhibitor = Arc<Inhibitor>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::matcher::{MatchOp, Matcher};
    use crate::core::model::Alert;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn rule() -> InhibitRule {
        InhibitRule {
            source_matchers: vec![Matcher::new("severity", MatchOp::Eq, "critical").unwrap()],
            target_matchers: vec![Matcher::new("severity", MatchOp::Eq, "warning").unwrap()],
            equal: vec!["alertname".into(), "instance".into()],
        }
    }

    fn fire(store: &AlertStore, labels: Labels) -> u64 {
        let alert = Alert {
            labels,
            annotations: Labels::new(),
            starts_at: 0,
            ends_at: crate::core::model::now_unix() + 1000,
            generator_url: "x".into(),
        };
        let fp = alert.fingerprint();
        store.ingest(alert).unwrap();
        fp
    }

    #[test]
    fn target_is_inhibited_while_source_firing_with_different_label_values() {
        let store = Arc::new(AlertStore::new(300));
        let inhibitor = Inhibitor::new(vec![rule()], store.clone());
        let target = labels(&[("severity", "warning"), ("alertname", "Foo"), ("instance", "x")]);
        let target_fp = fingerprint_of(&target);

        assert!(!inhibitor.is_inhibited(target_fp, &target));

        let source = labels(&[("severity", "critical"), ("alertname", "Foo"), ("instance", "x")]);
        fire(&store, source);
        assert!(inhibitor.is_inhibited(target_fp, &target));
    }

    #[test]
    fn non_target_alert_is_never_inhibited() {
        let store = Arc::new(AlertStore::new(300));
        let inhibitor = Inhibitor::new(vec![rule()], store.clone());
        fire(&store, labels(&[("severity", "critical"), ("alertname", "Foo"), ("instance", "x")]));
        let unrelated = labels(&[("severity", "info"), ("alertname", "Foo"), ("instance", "x")]);
        assert!(!inhibitor.is_inhibited(fingerprint_of(&unrelated), &unrelated));
    }

    #[test]
    fn equal_tuple_mismatch_does_not_inhibit() {
        let store = Arc::new(AlertStore::new(300));
        let inhibitor = Inhibitor::new(vec![rule()], store.clone());
        fire(&store, labels(&[("severity", "critical"), ("alertname", "Foo"), ("instance", "x")]));
        let target = labels(&[("severity", "warning"), ("alertname", "Foo"), ("instance", "y")]);
        assert!(!inhibitor.is_inhibited(fingerprint_of(&target), &target));
    }

    #[test]
    fn fallback_path_used_when_source_has_no_exact_matcher() {
        let rule = InhibitRule {
            source_matchers: vec![Matcher::new("severity", MatchOp::Regex, "crit.*").unwrap()],
            target_matchers: vec![Matcher::new("severity", MatchOp::Eq, "warning").unwrap()],
            equal: vec!["alertname".into()],
        };
        let store = Arc::new(AlertStore::new(300));
        let inhibitor = Inhibitor::new(vec![rule], store.clone());
        fire(&store, labels(&[("severity", "critical"), ("alertname", "Foo")]));
        let target = labels(&[("severity", "warning"), ("alertname", "Foo")]);
        assert!(inhibitor.is_inhibited(fingerprint_of(&target), &target));
    }

    fn fingerprint_of(labels: &Labels) -> u64 {
        crate::core::model::fingerprint(labels)
    }
}
