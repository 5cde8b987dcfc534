// src/core/model.rs

//! Core domain types shared across the store, inhibitor, silencer and dispatcher:
//! labels, alerts, silences, inhibition rules and fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A label set, kept in sorted order so fingerprinting is deterministic.
pub type Labels = BTreeMap<String, String>;

/// A stable 64-bit fingerprint of a label set, used as the alert's dedup key.
///
/// Missing labels and empty-valued labels are equivalent for matching purposes,
/// but they are NOT equivalent for fingerprinting: two alerts with different
/// label sets always get different fingerprints, even if a matcher would treat
/// them the same way.
pub fn fingerprint(labels: &Labels) -> u64 {
    let mut hasher = Sha256::new();
    for (k, v) in labels {
        hasher.update(k.as_bytes());
        hasher.update([0xff]);
        hasher.update(v.as_bytes());
        hasher.update([0xff]);
    }
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest >= 8 bytes"))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// An alert as received from a client and tracked internally.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Alert {
    pub labels: Labels,
    pub annotations: Labels,
    /// Unix timestamp (seconds) this alert instance started firing.
    pub starts_at: i64,
    /// Unix timestamp (seconds) this alert instance is expected to resolve.
    /// An alert with `ends_at <= now` is considered resolved.
    pub ends_at: i64,
    /// Opaque identifier of the Alertmanager/client that generated this alert.
    pub generator_url: String,
}

impl Alert {
    pub fn fingerprint(&self) -> u64 {
        fingerprint(&self.labels)
    }

    pub fn is_resolved(&self) -> bool {
        self.ends_at > 0 && self.ends_at <= now_unix()
    }

    /// Returns the value for `name`, treating an absent label as the empty string,
    /// matching the matcher semantics throughout the rest of the system.
    pub fn label(&self, name: &str) -> &str {
        self.labels.get(name).map(String::as_str).unwrap_or("")
    }
}

/// A stored alert, merged from one or more incoming `Alert`s sharing a fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct StoredAlert {
    pub alert: Alert,
    pub updated_at: i64,
    /// Set once the alert transitions to resolved; retained for the GC grace window.
    pub resolved_at: Option<i64>,
}

impl StoredAlert {
    pub fn new(alert: Alert) -> Self {
        Self {
            alert,
            updated_at: now_unix(),
            resolved_at: None,
        }
    }

    /// Merges an incoming alert into this stored instance, per the "latest wins,
    /// widest active window" dedup rule: `starts_at` keeps the earliest value seen,
    /// `ends_at` is the max seen across every ingest unless the incoming alert
    /// explicitly resolves, in which case it is taken as-is (resolution can pull
    /// the window back in).
    pub fn merge(&mut self, incoming: Alert) {
        self.alert.annotations = incoming.annotations.clone();
        self.alert.generator_url = incoming.generator_url.clone();
        if incoming.starts_at < self.alert.starts_at {
            self.alert.starts_at = incoming.starts_at;
        }
        if incoming.is_resolved() {
            self.alert.ends_at = incoming.ends_at;
        } else {
            self.alert.ends_at = self.alert.ends_at.max(incoming.ends_at);
        }
        self.updated_at = now_unix();
        if incoming.is_resolved() {
            self.resolved_at.get_or_insert_with(now_unix);
        } else {
            self.resolved_at = None;
        }
    }
}

/// The lifecycle state of a `Silence`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode, strum_macros::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum SilenceState {
    Pending,
    Active,
    Expired,
}

/// A silence: a set of matchers plus a time window during which matching alerts
/// are suppressed from notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Silence {
    pub id: uuid::Uuid,
    pub matchers: Vec<crate::core::matcher::Matcher>,
    pub starts_at: i64,
    pub ends_at: i64,
    pub created_by: String,
    pub comment: String,
    pub updated_at: i64,
}

/// `uuid::Uuid` does not implement `bincode::Encode`/`Decode` directly, so the
/// gossiped representation round-trips it through its raw 16-byte form.
impl bincode::Encode for Silence {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(self.id.as_bytes(), encoder)?;
        bincode::Encode::encode(&self.matchers, encoder)?;
        bincode::Encode::encode(&self.starts_at, encoder)?;
        bincode::Encode::encode(&self.ends_at, encoder)?;
        bincode::Encode::encode(&self.created_by, encoder)?;
        bincode::Encode::encode(&self.comment, encoder)?;
        bincode::Encode::encode(&self.updated_at, encoder)
    }
}

impl<Context> bincode::Decode<Context> for Silence {
    fn decode<D: bincode::de::Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        let id_bytes: [u8; 16] = bincode::Decode::decode(decoder)?;
        Ok(Silence {
            id: uuid::Uuid::from_bytes(id_bytes),
            matchers: bincode::Decode::decode(decoder)?,
            starts_at: bincode::Decode::decode(decoder)?,
            ends_at: bincode::Decode::decode(decoder)?,
            created_by: bincode::Decode::decode(decoder)?,
            comment: bincode::Decode::decode(decoder)?,
            updated_at: bincode::Decode::decode(decoder)?,
        })
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for Silence {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        <Silence as bincode::Decode<Context>>::decode(decoder)
    }
}

impl Silence {
    pub fn state_at(&self, now: i64) -> SilenceState {
        if now < self.starts_at {
            SilenceState::Pending
        } else if now < self.ends_at {
            SilenceState::Active
        } else {
            SilenceState::Expired
        }
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.matchers.iter().all(|m| m.matches_labels(labels))
    }
}

/// An inhibition rule: alerts matching `target_matchers` are suppressed while a
/// distinct alert matching `source_matchers` is firing and the two share equal
/// values for every label named in `equal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InhibitRule {
    pub source_matchers: Vec<crate::core::matcher::Matcher>,
    pub target_matchers: Vec<crate::core::matcher::Matcher>,
    pub equal: Vec<String>,
}

impl InhibitRule {
    pub fn source_matches(&self, labels: &Labels) -> bool {
        self.source_matchers.iter().all(|m| m.matches_labels(labels))
    }

    pub fn target_matches(&self, labels: &Labels) -> bool {
        self.target_matchers.iter().all(|m| m.matches_labels(labels))
    }

    pub fn equal_tuple(&self, labels: &Labels) -> Vec<String> {
        self.equal
            .iter()
            .map(|name| labels.get(name).cloned().unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = labels(&[("alertname", "Foo"), ("instance", "x")]);
        let b = labels(&[("instance", "x"), ("alertname", "Foo")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_values() {
        let a = labels(&[("alertname", "Foo")]);
        let b = labels(&[("alertname", "Bar")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn merge_widens_window_and_clears_resolution() {
        let base = Alert {
            labels: labels(&[("alertname", "Foo")]),
            annotations: Labels::new(),
            starts_at: 100,
            ends_at: 200,
            generator_url: "a".into(),
        };
        let mut stored = StoredAlert::new(base.clone());
        let mut incoming = base;
        incoming.starts_at = 50;
        incoming.ends_at = 300;
        stored.merge(incoming);
        assert_eq!(stored.alert.starts_at, 50);
        assert_eq!(stored.alert.ends_at, 300);
        assert!(stored.resolved_at.is_none());
    }

    #[test]
    fn merge_never_shrinks_ends_at_unless_resolving() {
        let base = Alert {
            labels: labels(&[("alertname", "Foo")]),
            annotations: Labels::new(),
            starts_at: 100,
            ends_at: now_unix() + 300,
            generator_url: "a".into(),
        };
        let mut stored = StoredAlert::new(base.clone());
        let mut retried = base;
        retried.ends_at = now_unix() + 100;
        stored.merge(retried);
        assert_eq!(stored.alert.ends_at, now_unix() + 300);
    }
}
