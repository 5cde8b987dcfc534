// src/core/gossip/mod.rs

//! A generic, last-write-wins replicated channel used by both the silence
//! store and the notification log. Each record carries its own identity and
//! timestamp; merging two copies of the channel is commutative, associative
//! and idempotent, so peers can exchange full or partial state in any order
//! and without coordination.

pub mod wire;

use crate::core::errors::AlertError;
use dashmap::DashMap;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A value that can live inside a `GossipChannel`.
pub trait Record: Clone + Send + Sync + bincode::Encode + bincode::Decode<()> + 'static {
    type Key: Eq + Hash + Clone + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
    /// Logical write timestamp (unix seconds) used to resolve conflicting updates.
    fn timestamp(&self) -> i64;
    /// True once the record is old enough to be dropped from the channel entirely.
    fn is_expired(&self, now: i64) -> bool;
    /// Secondary ordering key used only when two records tie on `timestamp()`
    /// (e.g. two peers writing within the same wall-clock second): the record
    /// with the lexicographically greater tie-break key wins, so merge order
    /// stays deterministic regardless of which peer's copy is seen first.
    /// Defaults to empty, which keeps prior (arrival-order) behavior for
    /// records that never tie in practice.
    fn tie_break(&self) -> &str {
        ""
    }
}

const BROADCAST_CAPACITY: usize = 4096;

/// A single gossiped key/value table with LWW-merge semantics.
pub struct GossipChannel<T: Record> {
    records: DashMap<T::Key, T>,
    outbox: broadcast::Sender<T>,
    dropped_broadcasts: AtomicU64,
}

impl<T: Record> GossipChannel<T> {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            records: DashMap::new(),
            outbox: tx,
            dropped_broadcasts: AtomicU64::new(0),
        }
    }

    pub fn subscribe_outbox(&self) -> broadcast::Receiver<T> {
        self.outbox.subscribe()
    }

    /// Applies a local write and queues it for broadcast to peers.
    pub fn set(&self, record: T) {
        self.merge_one(record.clone());
        if self.outbox.send(record).is_err() {
            self.dropped_broadcasts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Merges a record received from a peer (or from a local write) using
    /// last-write-wins on `timestamp()`. Returns true if the merge changed state.
    pub fn merge_one(&self, incoming: T) -> bool {
        let key = incoming.key();
        match self.records.entry(key) {
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(incoming);
                true
            }
            dashmap::mapref::entry::Entry::Occupied(mut o) => {
                let existing_ts = o.get().timestamp();
                let wins = match incoming.timestamp().cmp(&existing_ts) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => incoming.tie_break() >= o.get().tie_break(),
                    std::cmp::Ordering::Less => false,
                };
                if wins {
                    o.insert(incoming);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Merges a full batch of remote state, as received on initial peer sync.
    pub fn merge_full(&self, records: Vec<T>) -> usize {
        records.into_iter().filter(|r| self.merge_one(r.clone())).count()
    }

    /// Returns every record currently held, for use as a full-state gossip payload.
    pub fn marshal_full(&self) -> Vec<T> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get(&self, key: &T::Key) -> Option<T> {
        self.records.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> Vec<T> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    pub fn dropped_broadcasts(&self) -> u64 {
        self.dropped_broadcasts.load(Ordering::Relaxed)
    }

    /// Removes expired records. Returns the number removed.
    pub fn gc(&self, now: i64) -> usize {
        let mut removed = 0;
        self.records.retain(|_, v| {
            let keep = !v.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Persists the channel to `path` atomically: write to a temp file in the
    /// same directory, fsync, then rename over the destination. The payload is
    /// prefixed with a CRC-64 checksum of the encoded records so a truncated
    /// or bit-flipped snapshot is detected on load rather than silently
    /// misdecoded.
    pub async fn snapshot(&self, path: &Path) -> Result<(), AlertError> {
        let records = self.marshal_full();
        let bytes = wire::encode(&records)?;
        let checksum = CRC64.checksum(&bytes);
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&checksum.to_le_bytes()).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, path).await?;
        debug!(path = %path.display(), records = records.len(), "gossip channel snapshot written");
        Ok(())
    }

    /// Loads a previously-written snapshot, skipping already-expired records.
    pub async fn load(&self, path: &Path, now: i64) -> Result<usize, AlertError> {
        let raw = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        if raw.len() < 8 {
            warn!(path = %path.display(), "gossip snapshot too short for checksum header, starting empty");
            return Ok(0);
        }
        let (checksum_bytes, bytes) = raw.split_at(8);
        let expected = u64::from_le_bytes(checksum_bytes.try_into().expect("split_at(8)"));
        let actual = CRC64.checksum(bytes);
        if actual != expected {
            warn!(path = %path.display(), expected, actual, "gossip snapshot checksum mismatch, starting empty");
            return Ok(0);
        }
        let records: Vec<T> = match wire::decode(bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "gossip snapshot is corrupt, starting empty");
                return Ok(0);
            }
        };
        let fresh: Vec<T> = records.into_iter().filter(|r| !r.is_expired(now)).collect();
        let loaded = fresh.len();
        for r in fresh {
            self.merge_one(r);
        }
        Ok(loaded)
    }
}

static CRC64: crc::Crc<u64> = crc::Crc::<u64>::new(&crc::CRC_64_XZ);

impl<T: Record> Default for GossipChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedChannel<T> = Arc<GossipChannel<T>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, bincode::Encode, bincode::Decode)]
    struct Counter {
        id: u64,
        value: u64,
        ts: i64,
    }

    impl Record for Counter {
        type Key = u64;
        fn key(&self) -> u64 {
            self.id
        }
        fn timestamp(&self) -> i64 {
            self.ts
        }
        fn is_expired(&self, now: i64) -> bool {
            now - self.ts > 1000
        }
    }

    #[test]
    fn later_timestamp_wins() {
        let ch: GossipChannel<Counter> = GossipChannel::new();
        ch.merge_one(Counter { id: 1, value: 1, ts: 10 });
        ch.merge_one(Counter { id: 1, value: 2, ts: 5 });
        assert_eq!(ch.get(&1).unwrap().value, 1);
        ch.merge_one(Counter { id: 1, value: 3, ts: 20 });
        assert_eq!(ch.get(&1).unwrap().value, 3);
    }

    #[test]
    fn merge_is_commutative() {
        let a: GossipChannel<Counter> = GossipChannel::new();
        let b: GossipChannel<Counter> = GossipChannel::new();
        let r1 = Counter { id: 1, value: 1, ts: 10 };
        let r2 = Counter { id: 1, value: 2, ts: 20 };
        a.merge_one(r1.clone());
        a.merge_one(r2.clone());
        b.merge_one(r2);
        b.merge_one(r1);
        assert_eq!(a.get(&1).unwrap().value, b.get(&1).unwrap().value);
    }
}
