// src/core/silence/mod.rs

//! The silence store: create, query, expire and garbage-collect silences,
//! replicated across the cluster through a gossiped LWW channel.

use crate::core::errors::AlertError;
use crate::core::gossip::{GossipChannel, Record};
use crate::core::matcher::Matcher;
use crate::core::model::{Labels, Silence, SilenceState};
use std::sync::Arc;

/// How long an expired silence is retained in the channel before it is purged,
/// so peers that were partitioned during the expiry still converge on it.
const RETENTION_SECS: i64 = 5 * 60;

/// `Matcher` doesn't derive `PartialEq` (its compiled regex cache shouldn't
/// factor into equality), so matcher-set changes are compared structurally here.
fn matchers_equal(a: &[Matcher], b: &[Matcher]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name && x.op == y.op && x.value == y.value)
}

impl Record for Silence {
    type Key = uuid::Uuid;

    fn key(&self) -> uuid::Uuid {
        self.id
    }

    fn timestamp(&self) -> i64 {
        self.updated_at
    }

    fn is_expired(&self, now: i64) -> bool {
        now - self.ends_at > RETENTION_SECS
    }
}

pub struct SilenceStore {
    channel: Arc<GossipChannel<Silence>>,
}

impl SilenceStore {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(GossipChannel::new()),
        }
    }

    pub fn channel(&self) -> Arc<GossipChannel<Silence>> {
        self.channel.clone()
    }

    /// Validates and stores a new silence, or updates an existing one.
    ///
    /// Editing an active silence's matchers or `starts_at` forks it: the edit
    /// is stored under a fresh id and the original is expired immediately, so
    /// what an already-in-effect silence covered can't retroactively change.
    /// `ends_at` may always be extended, and may be shortened down to (but not
    /// below) `now`; shortening past `now` is what `expire` is for.
    pub fn set(&self, mut silence: Silence) -> Result<uuid::Uuid, AlertError> {
        if silence.matchers.is_empty() {
            return Err(AlertError::InvalidSilence("silence must have at least one matcher".into()));
        }
        if silence.ends_at <= silence.starts_at {
            return Err(AlertError::InvalidSilence("ends_at must be after starts_at".into()));
        }

        let now = crate::core::model::now_unix();
        if let Some(existing) = self.channel.get(&silence.id) {
            if existing.state_at(now) == SilenceState::Active {
                if silence.starts_at != existing.starts_at || !matchers_equal(&silence.matchers, &existing.matchers) {
                    let mut expired = existing;
                    expired.ends_at = now.min(expired.ends_at);
                    expired.updated_at = now;
                    self.channel.set(expired);

                    silence.id = uuid::Uuid::new_v4();
                    silence.updated_at = now;
                    let id = silence.id;
                    self.channel.set(silence);
                    return Ok(id);
                }
                if silence.ends_at < existing.ends_at && silence.ends_at < now {
                    return Err(AlertError::InvalidSilence(
                        "cannot shorten an active silence's window below now".into(),
                    ));
                }
            }
        } else if silence.id.is_nil() {
            silence.id = uuid::Uuid::new_v4();
        }

        silence.updated_at = now;
        let id = silence.id;
        self.channel.set(silence);
        Ok(id)
    }

    pub fn get(&self, id: &uuid::Uuid) -> Option<Silence> {
        self.channel.get(id)
    }

    /// Marks a silence as expired immediately by pulling its `ends_at` to now.
    pub fn expire(&self, id: &uuid::Uuid) -> Result<(), AlertError> {
        let mut silence = self.channel.get(id).ok_or(AlertError::SilenceNotFound(*id))?;
        let now = crate::core::model::now_unix();
        silence.ends_at = now.min(silence.ends_at);
        silence.updated_at = now;
        self.channel.set(silence);
        Ok(())
    }

    pub fn list(&self, state_filter: Option<SilenceState>) -> Vec<Silence> {
        let now = crate::core::model::now_unix();
        self.channel
            .iter()
            .into_iter()
            .filter(|s| state_filter.is_none_or(|f| s.state_at(now) == f))
            .collect()
    }

    /// Returns the silences that currently silence the given label set.
    pub fn silencing(&self, labels: &Labels) -> Vec<Silence> {
        let now = crate::core::model::now_unix();
        self.channel
            .iter()
            .into_iter()
            .filter(|s| s.state_at(now) == SilenceState::Active && s.matches(labels))
            .collect()
    }

    pub fn is_silenced(&self, labels: &Labels) -> bool {
        let now = crate::core::model::now_unix();
        self.channel
            .iter()
            .into_iter()
            .any(|s| s.state_at(now) == SilenceState::Active && s.matches(labels))
    }

    pub fn gc(&self) -> usize {
        self.channel.gc(crate::core::model::now_unix())
    }
}

impl Default for SilenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::matcher::{MatchOp, Matcher};

    fn silence(starts: i64, ends: i64) -> Silence {
        Silence {
            id: uuid::Uuid::nil(),
            matchers: vec![Matcher::new("alertname", MatchOp::Eq, "Foo").unwrap()],
            starts_at: starts,
            ends_at: ends,
            created_by: "tester".into(),
            comment: "testing".into(),
            updated_at: 0,
        }
    }

    #[test]
    fn set_assigns_id_and_is_queryable() {
        let store = SilenceStore::new();
        let now = crate::core::model::now_unix();
        let id = store.set(silence(now - 10, now + 1000)).unwrap();
        let fetched = store.get(&id).unwrap();
        assert_eq!(fetched.created_by, "tester");
    }

    #[test]
    fn editing_matchers_on_an_active_silence_forks_a_new_id() {
        let store = SilenceStore::new();
        let now = crate::core::model::now_unix();
        let id = store.set(silence(now - 10, now + 1000)).unwrap();
        let mut update = store.get(&id).unwrap();
        update.matchers.push(Matcher::new("severity", MatchOp::Eq, "critical").unwrap());
        let new_id = store.set(update).unwrap();

        assert_ne!(new_id, id);
        assert_eq!(store.get(&id).unwrap().state_at(now), SilenceState::Expired);
        assert_eq!(store.get(&new_id).unwrap().matchers.len(), 2);
    }

    #[test]
    fn active_silence_ends_at_may_shorten_down_to_now() {
        let store = SilenceStore::new();
        let now = crate::core::model::now_unix();
        let id = store.set(silence(now - 10, now + 1000)).unwrap();
        let mut update = store.get(&id).unwrap();
        update.ends_at = now + 1;
        assert!(store.set(update).is_ok());
    }

    #[test]
    fn active_silence_ends_at_cannot_shorten_below_now() {
        let store = SilenceStore::new();
        let now = crate::core::model::now_unix();
        let id = store.set(silence(now - 10, now + 1000)).unwrap();
        let mut update = store.get(&id).unwrap();
        update.ends_at = now - 5;
        assert!(store.set(update).is_err());
    }

    #[test]
    fn expire_pulls_ends_at_to_now() {
        let store = SilenceStore::new();
        let now = crate::core::model::now_unix();
        let id = store.set(silence(now - 10, now + 1000)).unwrap();
        store.expire(&id).unwrap();
        let s = store.get(&id).unwrap();
        assert!(s.ends_at <= now);
    }

    #[test]
    fn rejects_empty_matchers() {
        let store = SilenceStore::new();
        let mut s = silence(0, 100);
        s.matchers.clear();
        assert!(store.set(s).is_err());
    }
}
