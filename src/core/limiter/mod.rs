// src/core/limiter/mod.rs

//! A per-tenant bounded bucket that admits new alert fingerprints while the
//! tenant is under its quota, and evicts the soonest-to-resolve entries first
//! once the bucket is full, so a noisy tenant cannot starve others of tracking
//! capacity.

use dashmap::DashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Entry {
    fingerprint: u64,
    ends_at: i64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ends_at.cmp(&other.ends_at).then(self.fingerprint.cmp(&other.fingerprint))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A single tenant's bounded tracking set, ordered by `ends_at` so the
/// soonest-to-expire entries can be evicted first when the bucket is full.
struct Bucket {
    capacity: usize,
    heap: BinaryHeap<Reverse<Entry>>,
    present: std::collections::HashSet<u64>,
}

impl Bucket {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::new(),
            present: std::collections::HashSet::new(),
        }
    }

    fn upsert(&mut self, fingerprint: u64, ends_at: i64) -> bool {
        if self.present.contains(&fingerprint) {
            // Drop the stale heap entry before pushing the refreshed one, so a
            // refreshed fingerprint can't be found and evicted via its old
            // (possibly already-expired) `ends_at`.
            self.heap.retain(|Reverse(e)| e.fingerprint != fingerprint);
            self.heap.push(Reverse(Entry { fingerprint, ends_at }));
            return true;
        }
        if self.capacity == 0 {
            return false;
        }
        if self.present.len() >= self.capacity {
            self.evict_stale();
            if self.present.len() >= self.capacity {
                return false;
            }
        }
        self.present.insert(fingerprint);
        self.heap.push(Reverse(Entry { fingerprint, ends_at }));
        true
    }

    fn evict_stale(&mut self) {
        let now = crate::core::model::now_unix();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.ends_at <= now {
                let top = self.heap.pop().unwrap().0;
                self.present.remove(&top.fingerprint);
            } else {
                break;
            }
        }
    }

    fn is_stale(&self, fingerprint: u64, now: i64) -> bool {
        !self.present.contains(&fingerprint)
            || self
                .heap
                .iter()
                .find(|Reverse(e)| e.fingerprint == fingerprint)
                .map(|Reverse(e)| e.ends_at <= now)
                .unwrap_or(true)
    }

    fn remove(&mut self, fingerprint: u64) {
        self.present.remove(&fingerprint);
        self.heap.retain(|Reverse(e)| e.fingerprint != fingerprint);
    }

    fn len(&self) -> usize {
        self.present.len()
    }
}

/// Per-tenant bucket limiter. Each tenant gets its own bounded `Bucket`, lazily
/// created on first use with the configured default capacity.
pub struct BucketLimiter {
    default_capacity: usize,
    buckets: DashMap<String, Mutex<Bucket>>,
}

impl BucketLimiter {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity,
            buckets: DashMap::new(),
        }
    }

    /// Attempts to admit or refresh `fingerprint` for `tenant`. Returns false if
    /// the tenant's bucket is full and contains no stale entries to evict.
    pub fn upsert(&self, tenant: &str, fingerprint: u64, ends_at: i64) -> bool {
        let bucket = self
            .buckets
            .entry(tenant.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(self.default_capacity)));
        bucket.lock().unwrap().upsert(fingerprint, ends_at)
    }

    pub fn is_stale(&self, tenant: &str, fingerprint: u64) -> bool {
        let now = crate::core::model::now_unix();
        self.buckets
            .get(tenant)
            .map(|b| b.lock().unwrap().is_stale(fingerprint, now))
            .unwrap_or(true)
    }

    pub fn remove(&self, tenant: &str, fingerprint: u64) {
        if let Some(bucket) = self.buckets.get(tenant) {
            bucket.lock().unwrap().remove(fingerprint);
        }
    }

    pub fn len(&self, tenant: &str) -> usize {
        self.buckets.get(tenant).map(|b| b.lock().unwrap().len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_capacity() {
        let limiter = BucketLimiter::new(2);
        let now = crate::core::model::now_unix();
        assert!(limiter.upsert("t1", 1, now + 100));
        assert!(limiter.upsert("t1", 2, now + 100));
        assert!(!limiter.upsert("t1", 3, now + 100));
        assert_eq!(limiter.len("t1"), 2);
    }

    #[test]
    fn zero_capacity_admits_nothing() {
        let limiter = BucketLimiter::new(0);
        assert!(!limiter.upsert("t1", 1, crate::core::model::now_unix() + 10));
    }

    #[test]
    fn full_bucket_evicts_stale_entries_to_admit_new() {
        let limiter = BucketLimiter::new(1);
        let now = crate::core::model::now_unix();
        limiter.upsert("t1", 1, now - 10);
        assert!(limiter.upsert("t1", 2, now + 100));
        assert_eq!(limiter.len("t1"), 1);
    }

    #[test]
    fn tenants_are_isolated() {
        let limiter = BucketLimiter::new(1);
        let now = crate::core::model::now_unix();
        assert!(limiter.upsert("t1", 1, now + 100));
        assert!(limiter.upsert("t2", 1, now + 100));
    }

    #[test]
    fn refreshing_a_fingerprint_drops_its_stale_heap_entry() {
        let limiter = BucketLimiter::new(1);
        let now = crate::core::model::now_unix();
        assert!(limiter.upsert("t1", 1, now - 10));
        assert!(limiter.upsert("t1", 1, now + 1000));
        assert!(!limiter.is_stale("t1", 1));
        assert_eq!(limiter.len("t1"), 1);
    }
}
