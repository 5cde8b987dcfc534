// src/core/tasks/snapshot.rs

//! Periodically persists a gossip channel to disk so a restarted node starts
//! from recent state instead of an empty log.

use crate::core::gossip::{GossipChannel, Record};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

pub async fn run_periodic_snapshot<T: Record>(
    name: &'static str,
    channel: Arc<GossipChannel<T>>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = channel.snapshot(&path).await {
                    error!(task = name, error = %e, "failed to write gossip snapshot");
                }
            }
            _ = shutdown.recv() => {
                if let Err(e) = channel.snapshot(&path).await {
                    error!(task = name, error = %e, "failed to write final gossip snapshot");
                } else {
                    info!(task = name, "wrote final gossip snapshot before shutdown");
                }
                break;
            }
        }
    }
}
