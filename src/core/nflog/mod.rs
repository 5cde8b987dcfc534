// src/core/nflog/mod.rs

//! The notification log: records which alert groups have been successfully
//! notified to which receiver, so the dispatcher can decide whether a
//! notification needs to be (re-)sent.

use crate::core::gossip::{GossipChannel, Record};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// How long a log entry is kept after its receiver's repeat interval has
/// elapsed, so peers that rejoin the cluster late still converge.
const RETENTION_SECS: i64 = 120 * 3600;

/// A record of one notification attempt's outcome for a `(group_key, receiver)` pair.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
pub struct NflogEntry {
    pub group_key: String,
    pub receiver: String,
    pub timestamp: i64,
    pub firing_fingerprints: Vec<u64>,
    pub resolved_fingerprints: Vec<u64>,
    /// Id of the node that wrote this entry, used only to break ties when two
    /// peers write within the same wall-clock second.
    pub writer_id: String,
}

impl NflogEntry {
    pub fn log_key(group_key: &str, receiver: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(group_key.as_bytes());
        hasher.update([0u8]);
        hasher.update(receiver.as_bytes());
        hasher.finalize().into()
    }
}

impl Record for NflogEntry {
    type Key = [u8; 32];

    fn key(&self) -> [u8; 32] {
        Self::log_key(&self.group_key, &self.receiver)
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn is_expired(&self, now: i64) -> bool {
        now - self.timestamp > RETENTION_SECS
    }

    fn tie_break(&self) -> &str {
        &self.writer_id
    }
}

pub struct NotificationLog {
    channel: Arc<GossipChannel<NflogEntry>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(GossipChannel::new()),
        }
    }

    pub fn channel(&self) -> Arc<GossipChannel<NflogEntry>> {
        self.channel.clone()
    }

    pub fn log(&self, entry: NflogEntry) {
        self.channel.set(entry);
    }

    pub fn query(&self, group_key: &str, receiver: &str) -> Option<NflogEntry> {
        self.channel.get(&NflogEntry::log_key(group_key, receiver))
    }

    /// Decides whether a notification needs to be (re-)sent, given the repeat
    /// interval configured for the receiving route. The rules, in order:
    ///
    /// (a) no prior entry exists -> send;
    /// (b) the firing set changed since the last successful notification -> send;
    /// (c) the repeat interval has elapsed since the last notification -> send;
    /// (d) otherwise, suppress.
    pub fn should_notify(&self, group_key: &str, receiver: &str, firing: &[u64], repeat_interval_secs: i64) -> bool {
        let Some(entry) = self.query(group_key, receiver) else {
            return true;
        };

        let mut prev: Vec<u64> = entry.firing_fingerprints.clone();
        let mut curr: Vec<u64> = firing.to_vec();
        prev.sort_unstable();
        curr.sort_unstable();
        if prev != curr {
            return true;
        }

        let now = crate::core::model::now_unix();
        now - entry.timestamp >= repeat_interval_secs
    }

    pub fn gc(&self) -> usize {
        self.channel.gc(crate::core::model::now_unix())
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_entry_means_send() {
        let log = NotificationLog::new();
        assert!(log.should_notify("group1", "default", &[1, 2], 3600));
    }

    #[test]
    fn unchanged_firing_set_waits_for_repeat_interval() {
        let log = NotificationLog::new();
        log.log(NflogEntry {
            group_key: "group1".into(),
            receiver: "default".into(),
            timestamp: crate::core::model::now_unix(),
            firing_fingerprints: vec![1, 2],
            resolved_fingerprints: vec![],
            writer_id: "n1".into(),
        });
        assert!(!log.should_notify("group1", "default", &[1, 2], 3600));
    }

    #[test]
    fn changed_firing_set_triggers_resend() {
        let log = NotificationLog::new();
        log.log(NflogEntry {
            group_key: "group1".into(),
            receiver: "default".into(),
            timestamp: crate::core::model::now_unix(),
            firing_fingerprints: vec![1, 2],
            resolved_fingerprints: vec![],
            writer_id: "n1".into(),
        });
        assert!(log.should_notify("group1", "default", &[1, 2, 3], 3600));
    }

    #[test]
    fn elapsed_repeat_interval_triggers_resend() {
        let log = NotificationLog::new();
        log.log(NflogEntry {
            group_key: "group1".into(),
            receiver: "default".into(),
            timestamp: crate::core::model::now_unix() - 100,
            firing_fingerprints: vec![1],
            resolved_fingerprints: vec![],
            writer_id: "n1".into(),
        });
        assert!(log.should_notify("group1", "default", &[1], 10));
    }
}
