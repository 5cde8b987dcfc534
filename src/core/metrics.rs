// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec, register_gauge, register_histogram};

lazy_static! {
    // --- Store gauges ---
    /// The number of alerts currently tracked in the store (firing + retained resolved).
    pub static ref ALERTS_TRACKED: Gauge =
        register_gauge!("sentryhive_alerts_tracked", "Number of alerts currently held in the store.").unwrap();
    /// The number of currently active (non-expired) silences.
    pub static ref SILENCES_ACTIVE: Gauge =
        register_gauge!("sentryhive_silences_active", "Number of currently active silences.").unwrap();
    /// The number of alert group aggregators currently live in the dispatcher.
    pub static ref DISPATCHER_GROUPS: Gauge =
        register_gauge!("sentryhive_dispatcher_groups", "Number of live alert group aggregators.").unwrap();
    /// The number of peers this node currently believes are part of the cluster.
    pub static ref CLUSTER_PEERS: Gauge =
        register_gauge!("sentryhive_cluster_peers", "Number of known cluster peers.").unwrap();
    /// The number of peers currently marked suspect due to missed probes.
    pub static ref CLUSTER_PEERS_SUSPECT: Gauge =
        register_gauge!("sentryhive_cluster_peers_suspect", "Number of peers marked suspect.").unwrap();

    // --- Counters ---
    /// The total number of alerts ingested since startup.
    pub static ref ALERTS_INGESTED_TOTAL: Counter =
        register_counter!("sentryhive_alerts_ingested_total", "Total number of alerts ingested.").unwrap();
    /// The total number of alerts rejected at ingestion due to validation failures.
    pub static ref ALERTS_REJECTED_TOTAL: Counter =
        register_counter!("sentryhive_alerts_rejected_total", "Total number of alerts rejected during ingestion.").unwrap();
    /// The total number of notifications attempted, labeled by receiver and outcome.
    pub static ref NOTIFICATIONS_TOTAL: CounterVec =
        register_counter_vec!("sentryhive_notifications_total", "Total notification attempts, labeled by receiver and outcome.", &["receiver", "outcome"]).unwrap();
    /// The total number of notification retries performed.
    pub static ref NOTIFICATION_RETRIES_TOTAL: Counter =
        register_counter!("sentryhive_notification_retries_total", "Total number of notification retry attempts.").unwrap();
    /// The number of gossip broadcasts dropped due to a full outbox, summed
    /// across the silence and notification-log channels. A gauge rather than
    /// a counter, since it mirrors each channel's own cumulative count rather
    /// than being incremented locally.
    pub static ref GOSSIP_DROPPED_TOTAL: Gauge =
        register_gauge!("sentryhive_gossip_dropped_total", "Total number of gossip broadcasts dropped due to backpressure.").unwrap();
    /// The total number of garbage-collection passes that removed at least one entry.
    pub static ref GC_PASSES_TOTAL: CounterVec =
        register_counter_vec!("sentryhive_gc_passes_total", "Total number of non-empty GC passes, labeled by store.", &["store"]).unwrap();

    // --- Histograms ---
    /// Wall-clock latency of a full notification pipeline run, from flush to
    /// delivery (or suppression decision).
    pub static ref PIPELINE_LATENCY_SECONDS: Histogram =
        register_histogram!("sentryhive_pipeline_latency_seconds", "Latency of a notification pipeline run in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
