// src/core/dispatch/mod.rs

//! The routing tree and dispatcher: walks incoming alerts down a tree of
//! matcher/group-by nodes, and maintains one alert-group aggregator per
//! `(node, group key)` pair that batches alerts and times out according to
//! its route's `group_wait`/`group_interval`/`repeat_interval`.

use crate::core::matcher::Matchers;
use crate::core::model::{Labels, StoredAlert};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub receiver: String,
    /// Labels to group alerts by. An empty set groups everything into one group.
    pub group_by: Vec<String>,
    pub group_by_all: bool,
    pub group_wait: Duration,
    pub group_interval: Duration,
    pub repeat_interval: Duration,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            receiver: "default".into(),
            group_by: vec![],
            group_by_all: false,
            group_wait: Duration::from_secs(30),
            group_interval: Duration::from_secs(300),
            repeat_interval: Duration::from_secs(4 * 3600),
        }
    }
}

/// A node in the routing tree. Matching is recursive: an alert is tested
/// against `matchers`, and if it matches, descends into `children`. If
/// `continue_matching` is false, the first matching leaf (or the first
/// matching node with no further matching children) stops the walk.
pub struct RouteNode {
    pub matchers: Matchers,
    pub config: RouteConfig,
    pub continue_matching: bool,
    pub children: Vec<RouteNode>,
}

impl RouteNode {
    pub fn root(config: RouteConfig) -> Self {
        Self {
            matchers: Matchers::default(),
            config,
            continue_matching: false,
            children: vec![],
        }
    }

    /// Returns every route this alert matches, walked depth-first, honoring
    /// each node's `continue_matching` flag.
    pub fn route(&self, labels: &Labels) -> Vec<&RouteConfig> {
        let mut out = Vec::new();
        self.route_into(labels, &mut out);
        out
    }

    fn route_into<'a>(&'a self, labels: &Labels, out: &mut Vec<&'a RouteConfig>) {
        if !self.matchers.matches(labels) {
            return;
        }
        let mut matched_child = false;
        for child in &self.children {
            if child.matchers.matches(labels) {
                matched_child = true;
                child.route_into(labels, out);
                if !child.continue_matching {
                    break;
                }
            }
        }
        if !matched_child {
            out.push(&self.config);
        }
    }
}

/// Collects every distinct receiver name reachable in the routing tree, so
/// callers can wire up one pipeline instance per receiver.
pub fn collect_receivers(root: &RouteNode) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_receivers_into(root, &mut out);
    out
}

fn collect_receivers_into(node: &RouteNode, out: &mut BTreeSet<String>) {
    out.insert(node.config.receiver.clone());
    for child in &node.children {
        collect_receivers_into(child, out);
    }
}

/// A deterministic key identifying which group an alert falls into under a
/// given route: the sorted values of the route's `group_by` labels.
pub fn group_key(route: &RouteConfig, labels: &Labels) -> String {
    let mut hasher = Sha256::new();
    hasher.update(route.receiver.as_bytes());
    if route.group_by_all {
        for (k, v) in labels {
            hasher.update(k.as_bytes());
            hasher.update([0]);
            hasher.update(v.as_bytes());
            hasher.update([0]);
        }
    } else {
        let names: BTreeSet<&String> = route.group_by.iter().collect();
        for name in names {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            hasher.update(labels.get(name).map(String::as_str).unwrap_or("").as_bytes());
            hasher.update([0]);
        }
    }
    hex::encode(hasher.finalize())
}

/// Signals an aggregator emits when it decides it is time to send (or resend)
/// its current batch of alerts through the notification pipeline.
#[derive(Debug, Clone)]
pub struct GroupFlush {
    pub receiver: String,
    pub group_key: String,
    pub group_labels: Labels,
    pub alerts: Vec<Arc<StoredAlert>>,
}

struct AggregatorState {
    alerts: std::collections::HashMap<u64, Arc<StoredAlert>>,
    first_flushed: bool,
    /// Set the moment every member of the group became resolved; cleared the
    /// moment a new unresolved member arrives. Once this has stood for a full
    /// `group_interval`, the aggregator tears itself down.
    all_resolved_since: Option<Instant>,
}

fn any_unresolved(alerts: &std::collections::HashMap<u64, Arc<StoredAlert>>) -> bool {
    alerts.values().any(|a| !a.alert.is_resolved())
}

/// Batches alerts sharing a `(route, group key)` pair and flushes them on the
/// route's wait/interval timers. One aggregator is spawned per group the first
/// time an alert lands in it, and it tears itself down after a period with no
/// alerts and no pending flush.
pub struct AlertGroup {
    state: Mutex<AggregatorState>,
    tx: mpsc::Sender<Arc<StoredAlert>>,
}

type GroupMap = DashMap<(String, String), (Arc<AlertGroup>, mpsc::Sender<Arc<StoredAlert>>)>;

impl AlertGroup {
    fn spawn(
        route: RouteConfig,
        key: String,
        group_labels: Labels,
        flush_tx: mpsc::Sender<GroupFlush>,
        groups: Arc<GroupMap>,
        entry_key: (String, String),
        mut shutdown: broadcast::Receiver<()>,
    ) -> (Arc<Self>, mpsc::Sender<Arc<StoredAlert>>) {
        let (tx, mut rx) = mpsc::channel::<Arc<StoredAlert>>(256);
        let group = Arc::new(Self {
            state: Mutex::new(AggregatorState {
                alerts: std::collections::HashMap::new(),
                first_flushed: false,
                all_resolved_since: None,
            }),
            tx: tx.clone(),
        });
        let task_group = group.clone();

        tokio::spawn(async move {
            let mut wait_deadline = Instant::now() + route.group_wait;
            loop {
                tokio::select! {
                    maybe_alert = rx.recv() => {
                        let Some(alert) = maybe_alert else { break };
                        let mut state = task_group.state.lock().await;
                        state.alerts.insert(alert.alert.fingerprint(), alert);
                        if !state.first_flushed {
                            wait_deadline = Instant::now() + route.group_wait;
                        }
                        if any_unresolved(&state.alerts) {
                            state.all_resolved_since = None;
                        }
                    }
                    _ = tokio::time::sleep_until(wait_deadline) => {
                        let mut state = task_group.state.lock().await;
                        if !state.alerts.is_empty() {
                            let alerts: Vec<_> = state.alerts.values().cloned().collect();
                            state.first_flushed = true;
                            drop(state);
                            let _ = flush_tx.send(GroupFlush {
                                receiver: route.receiver.clone(),
                                group_key: key.clone(),
                                group_labels: group_labels.clone(),
                                alerts,
                            }).await;
                            state = task_group.state.lock().await;
                        }

                        let now = Instant::now();
                        if !state.alerts.is_empty() && !any_unresolved(&state.alerts) {
                            match state.all_resolved_since {
                                Some(since) if now.duration_since(since) >= route.group_interval => {
                                    drop(state);
                                    groups.remove(&entry_key);
                                    debug!(group_key = %key, "alert group destroyed, no unresolved members remain");
                                    break;
                                }
                                Some(_) => {}
                                None => state.all_resolved_since = Some(now),
                            }
                        }
                        wait_deadline = now + route.group_interval;
                    }
                    _ = shutdown.recv() => {
                        break;
                    }
                }
            }
            debug!(group_key = %key, "alert group aggregator stopped");
        });

        (group, tx)
    }
}

/// Owns one `AlertGroup` per `(receiver, group key)` pair and the channel that
/// surfaces their flush decisions to the notification pipeline layer.
pub struct Dispatcher {
    root: RouteNode,
    groups: Arc<GroupMap>,
    flush_tx: mpsc::Sender<GroupFlush>,
    shutdown: broadcast::Sender<()>,
}

impl Dispatcher {
    pub fn new(root: RouteNode, flush_tx: mpsc::Sender<GroupFlush>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            root,
            groups: Arc::new(DashMap::new()),
            flush_tx,
            shutdown,
        }
    }

    /// Routes an alert to every matching route's aggregator.
    pub async fn dispatch(&self, alert: Arc<StoredAlert>) {
        let routes = self.root.route(&alert.alert.labels);
        for route in routes {
            let key = group_key(route, &alert.alert.labels);
            let group_labels: Labels = if route.group_by_all {
                alert.alert.labels.clone()
            } else {
                route
                    .group_by
                    .iter()
                    .filter_map(|name| alert.alert.labels.get(name).map(|v| (name.clone(), v.clone())))
                    .collect()
            };
            let entry_key = (route.receiver.clone(), key.clone());
            let tx = {
                if let Some(existing) = self.groups.get(&entry_key) {
                    existing.1.clone()
                } else {
                    let (group, tx) = AlertGroup::spawn(
                        route.clone(),
                        key.clone(),
                        group_labels,
                        self.flush_tx.clone(),
                        self.groups.clone(),
                        entry_key.clone(),
                        self.shutdown.subscribe(),
                    );
                    self.groups.insert(entry_key, (group, tx.clone()));
                    tx
                }
            };
            let _ = tx.send(alert.clone()).await;
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::matcher::{MatchOp, Matcher};
    use crate::core::model::Alert;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn group_key_is_stable_across_label_order() {
        let route = RouteConfig {
            group_by: vec!["alertname".into(), "instance".into()],
            ..RouteConfig::default()
        };
        let a = labels(&[("alertname", "Foo"), ("instance", "x")]);
        let b = labels(&[("instance", "x"), ("alertname", "Foo")]);
        assert_eq!(group_key(&route, &a), group_key(&route, &b));
    }

    #[test]
    fn routing_tree_descends_into_matching_children() {
        let mut root = RouteNode::root(RouteConfig {
            receiver: "default".into(),
            ..RouteConfig::default()
        });
        root.continue_matching = true;
        let team_node = RouteNode {
            matchers: Matchers(vec![Matcher::new("team", MatchOp::Eq, "sre").unwrap()]),
            config: RouteConfig {
                receiver: "sre-pager".into(),
                ..RouteConfig::default()
            },
            continue_matching: false,
            children: vec![],
        };
        root.children.push(team_node);

        let alert = Alert {
            labels: labels(&[("team", "sre")]),
            annotations: Labels::new(),
            starts_at: 0,
            ends_at: 0,
            generator_url: "x".into(),
        };
        let routes = root.route(&alert.labels);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].receiver, "sre-pager");
    }

    #[test]
    fn collect_receivers_gathers_every_distinct_receiver() {
        let mut root = RouteNode::root(RouteConfig {
            receiver: "default".into(),
            ..RouteConfig::default()
        });
        root.continue_matching = true;
        root.children.push(RouteNode {
            matchers: Matchers(vec![Matcher::new("team", MatchOp::Eq, "sre").unwrap()]),
            config: RouteConfig {
                receiver: "sre-pager".into(),
                ..RouteConfig::default()
            },
            continue_matching: false,
            children: vec![],
        });
        let receivers = collect_receivers(&root);
        assert_eq!(receivers, ["default".to_string(), "sre-pager".to_string()].into_iter().collect());
    }

    #[tokio::test]
    async fn group_is_torn_down_after_group_interval_once_fully_resolved() {
        let (flush_tx, mut flush_rx) = mpsc::channel(16);
        let route = RouteConfig {
            receiver: "default".into(),
            group_wait: Duration::from_millis(5),
            group_interval: Duration::from_millis(15),
            ..RouteConfig::default()
        };
        let dispatcher = Dispatcher::new(RouteNode::root(route), flush_tx);

        let mut alert = Alert {
            labels: labels(&[("alertname", "Foo")]),
            annotations: Labels::new(),
            starts_at: 0,
            ends_at: crate::core::model::now_unix() + 1000,
            generator_url: "x".into(),
        };
        dispatcher.dispatch(Arc::new(StoredAlert::new(alert.clone()))).await;
        assert_eq!(dispatcher.group_count(), 1);
        flush_rx.recv().await.unwrap();

        alert.ends_at = crate::core::model::now_unix() - 1;
        dispatcher.dispatch(Arc::new(StoredAlert::new(alert))).await;
        flush_rx.recv().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dispatcher.group_count(), 0);
    }
}
