// src/core/pipeline/stages.rs

//! The ordered stage pipeline a group flush passes through before (or instead
//! of) reaching a notifier: two mute checks, a staggering wait, then a fanout
//! to dedup + retry + log-the-attempt stages.

use crate::core::dispatch::GroupFlush;
use crate::core::errors::AlertError;
use crate::core::inhibit::Inhibitor;
use crate::core::nflog::{NflogEntry, NotificationLog};
use crate::core::pipeline::notifier::{Notification, Notifier};
use crate::core::silence::SilenceStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The result of a stage: either the context continues on to the next stage,
/// or the pipeline stops here (e.g. because everything was muted).
pub enum StageOutcome {
    Continue(GroupFlush),
    Stop,
}

#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, ctx: GroupFlush) -> Result<StageOutcome, AlertError>;
}

/// Drops alerts that are currently silenced from the group, stopping the
/// pipeline entirely if none remain.
pub struct MuteStage {
    silences: Arc<SilenceStore>,
}

impl MuteStage {
    pub fn new(silences: Arc<SilenceStore>) -> Self {
        Self { silences }
    }
}

#[async_trait]
impl Stage for MuteStage {
    async fn run(&self, mut ctx: GroupFlush) -> Result<StageOutcome, AlertError> {
        ctx.alerts.retain(|a| !self.silences.is_silenced(&a.alert.labels));
        if ctx.alerts.is_empty() {
            debug!(group_key = %ctx.group_key, "all alerts in group silenced");
            return Ok(StageOutcome::Stop);
        }
        Ok(StageOutcome::Continue(ctx))
    }
}

/// Drops alerts inhibited by another currently-firing alert.
pub struct InhibitMuteStage {
    inhibitor: Arc<Inhibitor>,
}

impl InhibitMuteStage {
    pub fn new(inhibitor: Arc<Inhibitor>) -> Self {
        Self { inhibitor }
    }
}

#[async_trait]
impl Stage for InhibitMuteStage {
    async fn run(&self, mut ctx: GroupFlush) -> Result<StageOutcome, AlertError> {
        ctx.alerts.retain(|a| !self.inhibitor.is_inhibited(a.alert.fingerprint(), &a.alert.labels));
        if ctx.alerts.is_empty() {
            debug!(group_key = %ctx.group_key, "all alerts in group inhibited");
            return Ok(StageOutcome::Stop);
        }
        Ok(StageOutcome::Continue(ctx))
    }
}

/// Staggers delivery across cluster peers so that, absent a leader election,
/// only roughly one peer ends up actually sending each notification: every
/// peer waits `position * jitter_unit` before proceeding, and any peer that
/// observes the notification log already updated in the meantime backs off.
pub struct WaitStage {
    nflog: Arc<NotificationLog>,
    peer_position: Box<dyn Fn() -> usize + Send + Sync>,
    jitter_unit: Duration,
}

impl WaitStage {
    pub fn new(nflog: Arc<NotificationLog>, peer_position: impl Fn() -> usize + Send + Sync + 'static, jitter_unit: Duration) -> Self {
        Self {
            nflog,
            peer_position: Box::new(peer_position),
            jitter_unit,
        }
    }
}

#[async_trait]
impl Stage for WaitStage {
    async fn run(&self, ctx: GroupFlush) -> Result<StageOutcome, AlertError> {
        let position = (self.peer_position)();
        let delay = self.jitter_unit * position as u32;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let firing: Vec<u64> = ctx.alerts.iter().filter(|a| !a.alert.is_resolved()).map(|a| a.alert.fingerprint()).collect();
        let mut sorted_firing = firing.clone();
        sorted_firing.sort_unstable();
        if let Some(entry) = self.nflog.query(&ctx.group_key, &ctx.receiver) {
            let mut prev = entry.firing_fingerprints.clone();
            prev.sort_unstable();
            if prev == sorted_firing {
                debug!(group_key = %ctx.group_key, "another peer already notified this group, backing off");
                return Ok(StageOutcome::Stop);
            }
        }
        Ok(StageOutcome::Continue(ctx))
    }
}

/// Decides, per the notification log's resend rules, whether this group
/// actually needs a fresh notification right now.
pub struct DedupStage {
    nflog: Arc<NotificationLog>,
    repeat_interval: Duration,
}

impl DedupStage {
    pub fn new(nflog: Arc<NotificationLog>, repeat_interval: Duration) -> Self {
        Self { nflog, repeat_interval }
    }
}

#[async_trait]
impl Stage for DedupStage {
    async fn run(&self, ctx: GroupFlush) -> Result<StageOutcome, AlertError> {
        let firing: Vec<u64> = ctx.alerts.iter().filter(|a| !a.alert.is_resolved()).map(|a| a.alert.fingerprint()).collect();
        let should_notify = self.nflog.should_notify(&ctx.group_key, &ctx.receiver, &firing, self.repeat_interval.as_secs() as i64);
        if should_notify {
            Ok(StageOutcome::Continue(ctx))
        } else {
            Ok(StageOutcome::Stop)
        }
    }
}

/// Delivers to the configured notifier, retrying transient failures with
/// exponential backoff capped at the route's group interval.
pub struct RetryStage {
    notifier: Arc<dyn Notifier>,
    max_elapsed: Duration,
}

impl RetryStage {
    pub fn new(notifier: Arc<dyn Notifier>, max_elapsed: Duration) -> Self {
        Self { notifier, max_elapsed }
    }

    pub async fn send(&self, notification: &Notification) -> Result<(), AlertError> {
        let mut backoff = Duration::from_millis(500);
        let deadline = tokio::time::Instant::now() + self.max_elapsed;
        loop {
            match self.notifier.notify(notification).await {
                Ok(()) => {
                    crate::core::metrics::NOTIFICATIONS_TOTAL
                        .with_label_values(&[&notification.receiver, "success"])
                        .inc();
                    return Ok(());
                }
                Err(e @ AlertError::NotifyPermanent { .. }) => {
                    crate::core::metrics::NOTIFICATIONS_TOTAL
                        .with_label_values(&[&notification.receiver, "permanent_failure"])
                        .inc();
                    return Err(e);
                }
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!(receiver = %notification.receiver, error = %e, "notification retries exhausted");
                        crate::core::metrics::NOTIFICATIONS_TOTAL
                            .with_label_values(&[&notification.receiver, "retries_exhausted"])
                            .inc();
                        return Err(e);
                    }
                    warn!(receiver = %notification.receiver, error = %e, backoff_ms = backoff.as_millis() as u64, "retrying notification");
                    crate::core::metrics::NOTIFICATION_RETRIES_TOTAL.inc();
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_elapsed);
                }
            }
        }
    }
}

/// Records a successful (or permanently-failed, still logged) delivery into
/// the notification log so future flushes of this group can dedup correctly.
pub struct SetNotifyStage {
    nflog: Arc<NotificationLog>,
    node_id: String,
}

impl SetNotifyStage {
    pub fn new(nflog: Arc<NotificationLog>, node_id: String) -> Self {
        Self { nflog, node_id }
    }

    pub fn record(&self, ctx: &GroupFlush) {
        let firing: Vec<u64> = ctx.alerts.iter().filter(|a| !a.alert.is_resolved()).map(|a| a.alert.fingerprint()).collect();
        let resolved: Vec<u64> = ctx.alerts.iter().filter(|a| a.alert.is_resolved()).map(|a| a.alert.fingerprint()).collect();
        self.nflog.log(NflogEntry {
            writer_id: self.node_id.clone(),
            group_key: ctx.group_key.clone(),
            receiver: ctx.receiver.clone(),
            timestamp: crate::core::model::now_unix(),
            firing_fingerprints: firing,
            resolved_fingerprints: resolved,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Alert, Labels, StoredAlert};

    fn flush() -> GroupFlush {
        let mut labels = Labels::new();
        labels.insert("alertname".into(), "Foo".into());
        let alert = Alert {
            labels,
            annotations: Labels::new(),
            starts_at: 0,
            ends_at: 0,
            generator_url: "x".into(),
        };
        GroupFlush {
            receiver: "default".into(),
            group_key: "g1".into(),
            group_labels: Labels::new(),
            alerts: vec![Arc::new(StoredAlert::new(alert))],
        }
    }

    #[tokio::test]
    async fn mute_stage_stops_when_all_silenced() {
        let silences = Arc::new(SilenceStore::new());
        let ctx = flush();
        let stage = MuteStage::new(silences.clone());
        silences
            .set(crate::core::model::Silence {
                id: uuid::Uuid::nil(),
                matchers: vec![crate::core::matcher::Matcher::new("alertname", crate::core::matcher::MatchOp::Eq, "Foo").unwrap()],
                starts_at: crate::core::model::now_unix() - 10,
                ends_at: crate::core::model::now_unix() + 1000,
                created_by: "t".into(),
                comment: "".into(),
                updated_at: 0,
            })
            .unwrap();
        let outcome = stage.run(ctx).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Stop));
    }

    #[tokio::test]
    async fn dedup_stage_suppresses_repeat_within_interval() {
        let nflog = Arc::new(NotificationLog::new());
        let ctx = flush();
        let fp = ctx.alerts[0].alert.fingerprint();
        nflog.log(NflogEntry {
            group_key: ctx.group_key.clone(),
            receiver: ctx.receiver.clone(),
            timestamp: crate::core::model::now_unix(),
            firing_fingerprints: vec![fp],
            resolved_fingerprints: vec![],
            writer_id: "n1".into(),
        });
        let stage = DedupStage::new(nflog, Duration::from_secs(3600));
        let outcome = stage.run(ctx).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Stop));
    }

    #[tokio::test]
    async fn dedup_stage_resends_once_group_fully_resolves() {
        let nflog = Arc::new(NotificationLog::new());
        let mut ctx = flush();
        let fp = ctx.alerts[0].alert.fingerprint();
        nflog.log(NflogEntry {
            group_key: ctx.group_key.clone(),
            receiver: ctx.receiver.clone(),
            timestamp: crate::core::model::now_unix(),
            firing_fingerprints: vec![fp],
            resolved_fingerprints: vec![],
            writer_id: "n1".into(),
        });
        let mut resolved_alert = ctx.alerts[0].alert.clone();
        resolved_alert.ends_at = crate::core::model::now_unix() - 1;
        ctx.alerts[0] = Arc::new(StoredAlert::new(resolved_alert));
        let stage = DedupStage::new(nflog, Duration::from_secs(3600));
        let outcome = stage.run(ctx).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Continue(_)));
    }
}
