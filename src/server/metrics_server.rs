// src/server/metrics_server.rs

use crate::core::metrics::gather_metrics;
use crate::core::state::Services;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint, refreshing the dynamic
/// gauges from live service state before encoding the Prometheus text format.
async fn metrics_handler(services: Arc<Services>) -> impl IntoResponse {
    crate::core::metrics::ALERTS_TRACKED.set(services.alerts.len() as f64);
    crate::core::metrics::SILENCES_ACTIVE.set(
        services
            .silences
            .list(Some(crate::core::model::SilenceState::Active))
            .len() as f64,
    );
    crate::core::metrics::DISPATCHER_GROUPS.set(services.dispatcher.group_count() as f64);
    crate::core::metrics::CLUSTER_PEERS.set(services.cluster.peer_count() as f64);
    crate::core::metrics::CLUSTER_PEERS_SUSPECT.set(
        services
            .cluster
            .peers()
            .iter()
            .filter(|p| p.is_suspect())
            .count() as f64,
    );
    crate::core::metrics::GOSSIP_DROPPED_TOTAL.set(
        (services.silences.channel().dropped_broadcasts() + services.nflog.channel().dropped_broadcasts()) as f64,
    );

    let body = gather_metrics();
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body)
}

/// Runs the ambient HTTP server exposing `/metrics`. This is the only HTTP
/// surface this crate binds; alert ingestion and query remain plain library
/// calls on `Services`.
pub async fn run_metrics_server(services: Arc<Services>, addr: SocketAddr, mut shutdown_rx: broadcast::Receiver<()>) {
    let app = Router::new().route("/metrics", get(move || metrics_handler(services.clone())));

    info!(%addr, "metrics server listening on /metrics");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
        .ok();
}
