// src/config.rs

//! Loads and validates the node's TOML configuration: storage paths, GC and
//! retention windows, cluster membership, and the routing tree and inhibition
//! rules used by the dispatcher and inhibitor.

use crate::core::dispatch::{RouteConfig, RouteNode};
use crate::core::matcher::{MatchOp, Matcher, Matchers};
use crate::core::model::InhibitRule;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("sentryhive_data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// How long a resolved alert is retained in the store before being purged.
    #[serde(with = "humantime_serde", default = "default_retention")]
    pub retention: Duration,
}

fn default_retention() -> Duration {
    Duration::from_secs(120 * 3600)
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { retention: default_retention() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(with = "humantime_serde", default = "default_gc_interval")]
    pub gc_interval: Duration,
    #[serde(default = "default_bucket_capacity")]
    pub bucket_capacity_per_tenant: usize,
}

fn default_gc_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_bucket_capacity() -> usize {
    10_000
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            gc_interval: default_gc_interval(),
            bucket_capacity_per_tenant: default_bucket_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_cluster_listen_address")]
    pub listen_address: SocketAddr,
    #[serde(default)]
    pub peers: Vec<SocketAddr>,
}

/// Defaults the cluster node id to `HOSTNAME`, falling back to a random id
/// when unset (e.g. outside a container/orchestrator that sets it).
fn default_node_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

fn default_cluster_listen_address() -> SocketAddr {
    "0.0.0.0:9094".parse().unwrap()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            listen_address: default_cluster_listen_address(),
            peers: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_listen_address")]
    pub listen_address: SocketAddr,
}

fn default_web_listen_address() -> SocketAddr {
    "0.0.0.0:9093".parse().unwrap()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { listen_address: default_web_listen_address() }
    }
}

/// Raw, TOML-facing description of a matcher, resolved into a compiled
/// `Matcher` once the whole file has been parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMatcher {
    pub name: String,
    pub op: String,
    pub value: String,
}

impl RawMatcher {
    fn resolve(&self) -> Result<Matcher> {
        let op: MatchOp = self
            .op
            .parse()
            .map_err(|_| anyhow!("unknown matcher op '{}'", self.op))?;
        Matcher::new(&self.name, op, &self.value).map_err(|e| anyhow!(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRoute {
    #[serde(default)]
    pub matchers: Vec<RawMatcher>,
    pub receiver: String,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub group_by_all: bool,
    #[serde(with = "humantime_serde", default = "default_group_wait")]
    pub group_wait: Duration,
    #[serde(with = "humantime_serde", default = "default_group_interval")]
    pub group_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_repeat_interval")]
    pub repeat_interval: Duration,
    #[serde(default)]
    pub continue_matching: bool,
    #[serde(default)]
    pub routes: Vec<RawRoute>,
}

fn default_group_wait() -> Duration {
    Duration::from_secs(30)
}
fn default_group_interval() -> Duration {
    Duration::from_secs(300)
}
fn default_repeat_interval() -> Duration {
    Duration::from_secs(4 * 3600)
}

impl RawRoute {
    fn resolve(&self) -> Result<RouteNode> {
        let matchers: Vec<Matcher> = self.matchers.iter().map(RawMatcher::resolve).collect::<Result<_>>()?;
        let children: Vec<RouteNode> = self.routes.iter().map(RawRoute::resolve).collect::<Result<_>>()?;
        Ok(RouteNode {
            matchers: Matchers(matchers),
            config: RouteConfig {
                receiver: self.receiver.clone(),
                group_by: self.group_by.clone(),
                group_by_all: self.group_by_all,
                group_wait: self.group_wait,
                group_interval: self.group_interval,
                repeat_interval: self.repeat_interval,
            },
            continue_matching: self.continue_matching,
            children,
        })
    }
}

fn default_root_route() -> RawRoute {
    RawRoute {
        matchers: vec![],
        receiver: "default".into(),
        group_by: vec![],
        group_by_all: false,
        group_wait: default_group_wait(),
        group_interval: default_group_interval(),
        repeat_interval: default_repeat_interval(),
        continue_matching: false,
        routes: vec![],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInhibitRule {
    pub source_matchers: Vec<RawMatcher>,
    pub target_matchers: Vec<RawMatcher>,
    #[serde(default)]
    pub equal: Vec<String>,
}

impl RawInhibitRule {
    fn resolve(&self) -> Result<InhibitRule> {
        Ok(InhibitRule {
            source_matchers: self.source_matchers.iter().map(RawMatcher::resolve).collect::<Result<_>>()?,
            target_matchers: self.target_matchers.iter().map(RawMatcher::resolve).collect::<Result<_>>()?,
            equal: self.equal.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutesConfig {
    #[serde(with = "humantime_serde", default = "default_repeat_interval")]
    pub default_repeat_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_group_interval")]
    pub default_group_interval: Duration,
}

/// The node's fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub storage: StorageConfig,
    pub data: DataConfig,
    pub alerts: AlertsConfig,
    pub cluster: ClusterConfig,
    pub web: WebConfig,
    pub routes: RoutesConfig,
    pub inhibit_rules: Vec<InhibitRule>,
    root_route: RawRoute,
}

/// The on-disk TOML shape, kept separate from `Config` because the routing
/// tree and inhibition rules need a post-parse resolution pass (compiling
/// regexes, validating matcher ops) that can fail independently of basic
/// structural parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    data: DataConfig,
    #[serde(default)]
    alerts: AlertsConfig,
    #[serde(default)]
    cluster: ClusterConfig,
    #[serde(default)]
    web: WebConfig,
    #[serde(default)]
    routes: RoutesConfig,
    #[serde(default)]
    inhibit_rules: Vec<RawInhibitRule>,
    #[serde(default = "default_root_route")]
    route: RawRoute,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            data: DataConfig::default(),
            alerts: AlertsConfig::default(),
            cluster: ClusterConfig::default(),
            web: WebConfig::default(),
            routes: RoutesConfig::default(),
            inhibit_rules: vec![],
            route: default_root_route(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents).with_context(|| format!("failed to parse TOML from '{path}'"))?;
        Self::from_raw(raw)
    }

    pub fn default_for_tests() -> Self {
        Self::from_raw(RawConfig::default()).expect("default config must resolve")
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let inhibit_rules = raw.inhibit_rules.iter().map(RawInhibitRule::resolve).collect::<Result<_>>()?;
        let root_route = raw.route.clone();
        // Resolve once up front to fail fast on invalid matcher syntax.
        root_route.resolve()?;

        let config = Config {
            log_level: raw.log_level,
            storage: raw.storage,
            data: raw.data,
            alerts: raw.alerts,
            cluster: raw.cluster,
            web: raw.web,
            routes: raw.routes,
            inhibit_rules,
            root_route,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.alerts.bucket_capacity_per_tenant == 0 {
            anyhow::bail!("alerts.bucket_capacity_per_tenant must be greater than 0");
        }
        Ok(())
    }

    /// Rebuilds the routing tree from its resolved description. Called once
    /// at `Services::initialize` time.
    pub fn routing_tree(&self) -> RouteNode {
        self.root_route.resolve().expect("validated at load time")
    }
}
