// src/core/tasks/gc.rs

//! A generic periodic-GC driver: ticks a closure on an interval until told to
//! shut down. Used for the alert store, silence store and notification log.

use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

pub async fn run_periodic<F>(name: &'static str, interval: Duration, mut shutdown: broadcast::Receiver<()>, mut tick: F)
where
    F: FnMut() -> usize + Send,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = tick();
                if removed > 0 {
                    debug!(task = name, removed, "periodic gc pass reclaimed entries");
                    crate::core::metrics::GC_PASSES_TOTAL.with_label_values(&[name]).inc();
                }
            }
            _ = shutdown.recv() => {
                debug!(task = name, "periodic gc task shutting down");
                break;
            }
        }
    }
}
