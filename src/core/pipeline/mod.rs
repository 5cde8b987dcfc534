// src/core/pipeline/mod.rs

//! Wires the ordered stage sequence together and runs one `GroupFlush` through
//! it per call, cancellable via a deadline so a hung notifier can't wedge a
//! receiver's pipeline forever.

pub mod notifier;
pub mod stages;

use crate::core::dispatch::GroupFlush;
use crate::core::errors::AlertError;
use crate::core::inhibit::Inhibitor;
use crate::core::nflog::NotificationLog;
use crate::core::pipeline::notifier::{Notification, Notifier};
use crate::core::pipeline::stages::{DedupStage, InhibitMuteStage, MuteStage, RetryStage, SetNotifyStage, Stage, StageOutcome, WaitStage};
use crate::core::silence::SilenceStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct PipelineConfig {
    pub repeat_interval: Duration,
    pub peer_jitter_unit: Duration,
    pub max_retry_elapsed: Duration,
}

/// Per-receiver notification pipeline: mute -> mute (inhibition) -> wait ->
/// dedup -> retry -> record. Each `(group_key, receiver)` pair is expected to
/// be driven serially by its caller (the dispatcher flushes one group at a
/// time), so no additional locking is needed inside the pipeline itself.
pub struct Pipeline {
    mute: MuteStage,
    inhibit_mute: InhibitMuteStage,
    wait: WaitStage,
    dedup: DedupStage,
    retry: RetryStage,
    set_notify: SetNotifyStage,
}

impl Pipeline {
    pub fn new(
        silences: Arc<SilenceStore>,
        inhibitor: Arc<Inhibitor>,
        nflog: Arc<NotificationLog>,
        notifier: Arc<dyn Notifier>,
        peer_position: impl Fn() -> usize + Send + Sync + 'static,
        node_id: String,
        config: PipelineConfig,
    ) -> Self {
        Self {
            mute: MuteStage::new(silences),
            inhibit_mute: InhibitMuteStage::new(inhibitor),
            wait: WaitStage::new(nflog.clone(), peer_position, config.peer_jitter_unit),
            dedup: DedupStage::new(nflog.clone(), config.repeat_interval),
            retry: RetryStage::new(notifier, config.max_retry_elapsed),
            set_notify: SetNotifyStage::new(nflog, node_id),
        }
    }

    /// Runs a flush through the full stage sequence, aborting early if any
    /// mute/dedup stage decides nothing needs sending. `deadline` bounds the
    /// whole pipeline, including delivery retries.
    pub async fn process(&self, flush: GroupFlush, deadline: Duration) -> Result<(), AlertError> {
        let group_key = flush.group_key.clone();
        let _timer = crate::core::metrics::PIPELINE_LATENCY_SECONDS.start_timer();
        let run = async {
            let mut ctx = flush;
            for stage in [&self.inhibit_mute as &dyn Stage, &self.mute, &self.wait, &self.dedup] {
                match stage.run(ctx).await? {
                    StageOutcome::Continue(next) => ctx = next,
                    StageOutcome::Stop => return Ok(()),
                }
            }

            let notification = Notification {
                receiver: ctx.receiver.clone(),
                group_key: ctx.group_key.clone(),
                group_labels: ctx.group_labels.clone(),
                alerts: ctx.alerts.clone(),
            };
            let result = self.retry.send(&notification).await;
            match &result {
                Ok(()) => self.set_notify.record(&ctx),
                Err(AlertError::NotifyPermanent { .. }) => self.set_notify.record(&ctx),
                Err(_) => {}
            }
            result
        };

        match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(group_key = %group_key, "notification pipeline exceeded its deadline");
                Err(AlertError::Cancelled)
            }
        }
    }
}

/// Drives flushes coming off the dispatcher's channel into per-receiver
/// pipelines, serializing delivery within a `(group_key, receiver)` pair
/// while allowing different groups to proceed concurrently.
pub async fn run_pipeline_loop(
    mut flushes: tokio::sync::mpsc::Receiver<GroupFlush>,
    pipelines: std::collections::HashMap<String, Arc<Pipeline>>,
    deadline: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            maybe_flush = flushes.recv() => {
                let Some(flush) = maybe_flush else { break };
                let Some(pipeline) = pipelines.get(&flush.receiver).cloned() else {
                    warn!(receiver = %flush.receiver, "no pipeline wired for this receiver, dropping flush");
                    continue;
                };
                tokio::spawn(async move {
                    if let Err(e) = pipeline.process(flush, deadline).await {
                        debug!(error = %e, "pipeline run did not deliver a notification");
                    }
                });
            }
            _ = shutdown.recv() => break,
        }
    }
}
