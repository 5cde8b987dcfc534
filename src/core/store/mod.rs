// src/core/store/mod.rs

//! The alert store: deduplicates incoming alerts by fingerprint, tracks their
//! firing/resolved lifecycle, and notifies subscribers of changes so the
//! dispatcher can react without polling.

use crate::core::errors::AlertError;
use crate::core::limiter::BucketLimiter;
use crate::core::model::{Alert, Labels, StoredAlert};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// The label used to key an alert into its tenant's admission bucket; alerts
/// without it share a single `"default"` tenant.
const TENANT_LABEL: &str = "tenant";

/// The capacity of the store's change-notification broadcast channel. Slow
/// subscribers that fall behind this many updates will see `RecvError::Lagged`
/// on their next `recv` rather than block publishers.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum StoreEvent {
    Upserted(Arc<StoredAlert>),
    Resolved(Arc<StoredAlert>),
}

/// Holds every currently-tracked alert, keyed by fingerprint.
pub struct AlertStore {
    alerts: DashMap<u64, Arc<StoredAlert>>,
    events: broadcast::Sender<StoreEvent>,
    /// How long a resolved alert is retained before garbage collection, so that
    /// late-arriving queries and the dispatcher's resolve notifications still see it.
    retention_secs: i64,
}

impl AlertStore {
    pub fn new(retention_secs: i64) -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            alerts: DashMap::new(),
            events: tx,
            retention_secs,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Ingests a single alert, merging it into any existing instance with the
    /// same fingerprint. Returns the resulting stored alert.
    pub fn ingest(&self, alert: Alert) -> Result<Arc<StoredAlert>, AlertError> {
        if alert.labels.get("alertname").map(String::as_str).unwrap_or("").is_empty() {
            crate::core::metrics::ALERTS_REJECTED_TOTAL.inc();
            return Err(AlertError::InvalidAlert("alertname label is required".into()));
        }
        if alert.ends_at != 0 && alert.ends_at < alert.starts_at {
            crate::core::metrics::ALERTS_REJECTED_TOTAL.inc();
            return Err(AlertError::InvalidAlert("ends_at precedes starts_at".into()));
        }

        let fp = alert.fingerprint();
        let stored = {
            let mut entry = self
                .alerts
                .entry(fp)
                .or_insert_with(|| Arc::new(StoredAlert::new(alert.clone())));
            let mut merged = (**entry).clone();
            merged.merge(alert);
            let merged = Arc::new(merged);
            *entry = merged.clone();
            merged
        };

        debug!(fingerprint = fp, "alert ingested");
        crate::core::metrics::ALERTS_INGESTED_TOTAL.inc();
        let event = if stored.alert.is_resolved() {
            StoreEvent::Resolved(stored.clone())
        } else {
            StoreEvent::Upserted(stored.clone())
        };
        let _ = self.events.send(event);
        Ok(stored)
    }

    pub fn get(&self, fingerprint: u64) -> Option<Arc<StoredAlert>> {
        self.alerts.get(&fingerprint).map(|e| e.clone())
    }

    /// Returns every currently-firing (non-resolved) alert, for the
    /// inhibitor's source-correlation search.
    pub fn firing(&self) -> Vec<Arc<StoredAlert>> {
        self.alerts.iter().map(|e| e.clone()).filter(|a| !a.alert.is_resolved()).collect()
    }

    /// Lists all alerts, optionally filtered by a matcher conjunction and by
    /// firing/resolved state.
    pub fn list_filtered(&self, matchers: &crate::core::matcher::Matchers, include_resolved: bool) -> Vec<Arc<StoredAlert>> {
        self.alerts
            .iter()
            .map(|e| e.clone())
            .filter(|a| include_resolved || !a.alert.is_resolved())
            .filter(|a| matchers.matches(&a.alert.labels))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn labels_for(&self, fingerprint: u64) -> Option<Labels> {
        self.alerts.get(&fingerprint).map(|e| e.alert.labels.clone())
    }

    /// Removes alerts that resolved more than `retention_secs` ago. Returns the
    /// number of alerts removed.
    pub fn gc(&self) -> usize {
        let now = crate::core::model::now_unix();
        let retention = self.retention_secs;
        let mut removed = 0;
        self.alerts.retain(|_, a| {
            let keep = match a.resolved_at {
                Some(resolved_at) => now - resolved_at < retention,
                None => true,
            };
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!(removed, "alert store gc reclaimed resolved alerts");
        }
        removed
    }
}

/// The external ingestion entrypoint: applies the per-tenant admission
/// bucket before handing an alert to the store, so a tenant producing more
/// distinct alerts than its quota gets `RateLimited` instead of unbounded
/// growth in the store.
pub struct IngestionService {
    store: Arc<AlertStore>,
    limiter: Arc<BucketLimiter>,
}

impl IngestionService {
    pub fn new(store: Arc<AlertStore>, limiter: Arc<BucketLimiter>) -> Self {
        Self { store, limiter }
    }

    pub fn ingest(&self, alert: Alert) -> Result<Arc<StoredAlert>, AlertError> {
        let tenant = alert.labels.get(TENANT_LABEL).map(String::as_str).unwrap_or("default");
        let fp = alert.fingerprint();
        if !self.limiter.upsert(tenant, fp, alert.ends_at) {
            crate::core::metrics::ALERTS_REJECTED_TOTAL.inc();
            return Err(AlertError::RateLimited);
        }
        self.store.ingest(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Labels;

    fn alert(name: &str, starts: i64, ends: i64) -> Alert {
        let mut labels = Labels::new();
        labels.insert("alertname".into(), name.into());
        Alert {
            labels,
            annotations: Labels::new(),
            starts_at: starts,
            ends_at: ends,
            generator_url: "test".into(),
        }
    }

    #[test]
    fn ingest_dedupes_by_fingerprint() {
        let store = AlertStore::new(300);
        store.ingest(alert("Foo", 100, 0)).unwrap();
        store.ingest(alert("Foo", 90, 0)).unwrap();
        assert_eq!(store.len(), 1);
        let fp = alert("Foo", 0, 0).fingerprint();
        let stored = store.get(fp).unwrap();
        assert_eq!(stored.alert.starts_at, 90);
    }

    #[test]
    fn rejects_alert_without_alertname() {
        let store = AlertStore::new(300);
        let mut a = alert("Foo", 1, 0);
        a.labels.clear();
        assert!(store.ingest(a).is_err());
    }

    #[test]
    fn gc_respects_retention_window() {
        let store = AlertStore::new(0);
        let mut a = alert("Foo", 1, 0);
        a.ends_at = crate::core::model::now_unix() - 10;
        store.ingest(a).unwrap();
        assert_eq!(store.gc(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn ingestion_service_rejects_once_tenant_bucket_is_full() {
        let store = Arc::new(AlertStore::new(300));
        let limiter = Arc::new(BucketLimiter::new(1));
        let ingestion = IngestionService::new(store, limiter);
        ingestion.ingest(alert("Foo", 0, crate::core::model::now_unix() + 1000)).unwrap();
        assert!(matches!(ingestion.ingest(alert("Bar", 0, crate::core::model::now_unix() + 1000)), Err(AlertError::RateLimited)));
    }
}
