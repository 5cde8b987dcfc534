// src/core/state/mod.rs

//! Assembles every subsystem into the single `Services` handle that the
//! server entry point, the background tasks and the metrics endpoint share.

use crate::config::Config;
use crate::core::cluster::ClusterState;
use crate::core::dispatch::{Dispatcher, collect_receivers};
use crate::core::inhibit::Inhibitor;
use crate::core::limiter::BucketLimiter;
use crate::core::nflog::NotificationLog;
use crate::core::pipeline::notifier::{LogNotifier, Notifier};
use crate::core::pipeline::{Pipeline, PipelineConfig};
use crate::core::silence::SilenceStore;
use crate::core::store::{AlertStore, IngestionService};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The live, wired-together set of services a running node hosts. Built once
/// at startup by `Services::initialize` and shared behind an `Arc` with every
/// background task.
pub struct Services {
    pub config: Config,
    pub alerts: Arc<AlertStore>,
    pub ingestion: Arc<IngestionService>,
    pub silences: Arc<SilenceStore>,
    pub nflog: Arc<NotificationLog>,
    pub inhibitor: Arc<Inhibitor>,
    pub limiter: Arc<BucketLimiter>,
    pub dispatcher: Arc<Dispatcher>,
    /// One pipeline instance per distinct receiver named in the routing tree,
    /// so a receiver's dedup/retry/notify state never bleeds into another's.
    pub pipelines: HashMap<String, Arc<Pipeline>>,
    pub cluster: Arc<ClusterState>,
    pub flush_rx: tokio::sync::Mutex<Option<mpsc::Receiver<crate::core::dispatch::GroupFlush>>>,
}

impl Services {
    /// Wires every subsystem from a validated `Config`, the way a teacher's
    /// `ServerState::initialize` assembles its sub-states. Accepts an
    /// explicit notifier so tests (and, eventually, transport crates outside
    /// this one) can supply their own.
    pub fn initialize(config: Config, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let alerts = Arc::new(AlertStore::new(config.data.retention.as_secs() as i64));
        let silences = Arc::new(SilenceStore::new());
        let nflog = Arc::new(NotificationLog::new());
        let inhibitor = Arc::new(Inhibitor::new(config.inhibit_rules.clone(), alerts.clone()));
        let limiter = Arc::new(BucketLimiter::new(config.alerts.bucket_capacity_per_tenant));
        let ingestion = Arc::new(IngestionService::new(alerts.clone(), limiter.clone()));

        let (flush_tx, flush_rx) = mpsc::channel(1024);
        let root = config.routing_tree();
        let receivers = collect_receivers(&root);
        let dispatcher = Arc::new(Dispatcher::new(root, flush_tx));

        let cluster = Arc::new(ClusterState::new(
            config.cluster.node_id.clone(),
            config.cluster.listen_address,
        ));

        let pipelines: HashMap<String, Arc<Pipeline>> = receivers
            .into_iter()
            .map(|receiver| {
                let cluster_for_position = cluster.clone();
                let pipeline = Pipeline::new(
                    silences.clone(),
                    inhibitor.clone(),
                    nflog.clone(),
                    notifier.clone(),
                    move || cluster_for_position.peer_position(),
                    cluster.local_id.clone(),
                    PipelineConfig {
                        repeat_interval: config.routes.default_repeat_interval,
                        peer_jitter_unit: std::time::Duration::from_millis(500),
                        max_retry_elapsed: config.routes.default_group_interval,
                    },
                );
                (receiver, Arc::new(pipeline))
            })
            .collect();

        Arc::new(Self {
            config,
            alerts,
            ingestion,
            silences,
            nflog,
            inhibitor,
            limiter,
            dispatcher,
            pipelines,
            cluster,
            flush_rx: tokio::sync::Mutex::new(Some(flush_rx)),
        })
    }

    pub fn with_log_notifier(config: Config) -> Arc<Self> {
        Self::initialize(config, Arc::new(LogNotifier::new("default")))
    }
}
