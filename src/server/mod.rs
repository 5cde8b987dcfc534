// src/server/mod.rs

use crate::config::Config;
use crate::core::pipeline::run_pipeline_loop;
use crate::core::state::Services;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, reload};

mod metrics_server;

pub use metrics_server::run_metrics_server;

/// The main server startup function: wires up `Services`, spawns every
/// background task, and blocks until a shutdown signal is observed.
pub async fn run(config: Config, _log_reload_handle: Arc<reload::Handle<EnvFilter, tracing_subscriber::Registry>>) -> Result<()> {
    let web_addr = config.web.listen_address;
    let gc_interval = config.alerts.gc_interval;
    let storage_path = config.storage.path.clone();

    let services = Services::with_log_notifier(config);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    tokio::fs::create_dir_all(&storage_path).await.ok();
    let silence_path = storage_path.join("silences.snap");
    let nflog_path = storage_path.join("nflog.snap");
    let now = crate::core::model::now_unix();
    if let Err(e) = services.silences.channel().load(&silence_path, now).await {
        tracing::warn!(error = %e, "failed to load silence snapshot");
    }
    if let Err(e) = services.nflog.channel().load(&nflog_path, now).await {
        tracing::warn!(error = %e, "failed to load notification log snapshot");
    }

    // Alert-store GC.
    {
        let alerts = services.alerts.clone();
        let rx = shutdown_tx.subscribe();
        tokio::spawn(crate::core::tasks::gc::run_periodic("alert_store_gc", gc_interval, rx, move || alerts.gc()));
    }
    // Silence GC.
    {
        let silences = services.silences.clone();
        let rx = shutdown_tx.subscribe();
        tokio::spawn(crate::core::tasks::gc::run_periodic("silence_gc", gc_interval, rx, move || silences.gc()));
    }
    // Notification log GC.
    {
        let nflog = services.nflog.clone();
        let rx = shutdown_tx.subscribe();
        tokio::spawn(crate::core::tasks::gc::run_periodic("nflog_gc", gc_interval, rx, move || nflog.gc()));
    }
    // Periodic gossip snapshots.
    {
        let channel = services.silences.channel();
        let rx = shutdown_tx.subscribe();
        tokio::spawn(crate::core::tasks::snapshot::run_periodic_snapshot(
            "silence_snapshot",
            channel,
            silence_path,
            Duration::from_secs(60),
            rx,
        ));
    }
    {
        let channel = services.nflog.channel();
        let rx = shutdown_tx.subscribe();
        tokio::spawn(crate::core::tasks::snapshot::run_periodic_snapshot(
            "nflog_snapshot",
            channel,
            nflog_path,
            Duration::from_secs(60),
            rx,
        ));
    }

    // Drain alert store events into the dispatcher.
    {
        let dispatcher = services.dispatcher.clone();
        let mut events = services.alerts.subscribe();
        let mut rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(crate::core::store::StoreEvent::Upserted(alert) | crate::core::store::StoreEvent::Resolved(alert)) => {
                                dispatcher.dispatch(alert).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "dispatcher lagged behind alert store events");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = rx.recv() => break,
                }
            }
        });
    }

    // Run the notification pipeline loop.
    {
        let pipelines = services.pipelines.clone();
        let rx = shutdown_tx.subscribe();
        let flush_rx = services.flush_rx.lock().await.take().expect("flush receiver taken exactly once");
        tokio::spawn(run_pipeline_loop(flush_rx, pipelines, Duration::from_secs(60), rx));
    }

    // Cluster membership probe loop.
    let cluster_socket = tokio::net::UdpSocket::bind(services.cluster.local_addr).await?;
    let cluster_socket = Arc::new(cluster_socket);
    for peer_addr in &services.config.cluster.peers {
        services.cluster.add_peer(peer_addr.to_string(), *peer_addr);
    }
    {
        let cluster = services.cluster.clone();
        let socket = cluster_socket.clone();
        let silences = services.silences.channel();
        let nflog = services.nflog.channel();
        let rx = shutdown_tx.subscribe();
        tokio::spawn(crate::core::cluster::transport::run_probe_loop(cluster, socket, silences, nflog, rx));
    }

    info!(address = %web_addr, "sentryhive node starting");
    let metrics_rx = shutdown_tx.subscribe();
    run_metrics_server(services, web_addr, metrics_rx).await;

    let _ = shutdown_tx.send(());
    Ok(())
}
