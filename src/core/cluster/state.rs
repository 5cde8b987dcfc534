// src/core/cluster/state.rs

//! Cluster membership for a symmetric peer group: unlike a primary/replica
//! topology there is no slot ownership or failover election here, so a peer's
//! only lifecycle states are "healthy" and "suspect".

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct PeerId(pub String);

/// A peer's static identity plus the locally-observed liveness state.
pub struct Peer {
    pub id: String,
    pub addr: SocketAddr,
    pub last_seen_unix: AtomicI64,
    pub suspect: AtomicBool,
}

impl Peer {
    fn new(id: String, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen_unix: AtomicI64::new(crate::core::model::now_unix()),
            suspect: AtomicBool::new(false),
        }
    }

    pub fn mark_seen(&self) {
        self.last_seen_unix.store(crate::core::model::now_unix(), Ordering::Relaxed);
        self.suspect.store(false, Ordering::Relaxed);
    }

    pub fn is_suspect(&self) -> bool {
        self.suspect.load(Ordering::Relaxed)
    }
}

/// How long without a successful ping/pong before a peer is marked suspect.
pub const SUSPECT_AFTER_SECS: i64 = 10;

/// Shared cluster state: this node's own id, and the set of known peers.
pub struct ClusterState {
    pub local_id: String,
    pub local_addr: SocketAddr,
    peers: DashMap<String, Arc<Peer>>,
}

impl ClusterState {
    pub fn new(local_id: String, local_addr: SocketAddr) -> Self {
        Self {
            local_id,
            local_addr,
            peers: DashMap::new(),
        }
    }

    pub fn add_peer(&self, id: String, addr: SocketAddr) -> Arc<Peer> {
        self.peers
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Peer::new(id, addr)))
            .clone()
    }

    pub fn peer(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|p| p.clone())
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Marks peers unseen for longer than `SUSPECT_AFTER_SECS` as suspect. Run
    /// periodically by the probe loop.
    pub fn sweep_suspects(&self) -> usize {
        let now = crate::core::model::now_unix();
        let mut marked = 0;
        for peer in self.peers.iter() {
            let elapsed = now - peer.last_seen_unix.load(Ordering::Relaxed);
            if elapsed > SUSPECT_AFTER_SECS && !peer.is_suspect() {
                peer.suspect.store(true, Ordering::Relaxed);
                marked += 1;
            }
        }
        marked
    }

    /// This node's rank among all known members (self included), ordered by
    /// id. Used by the pipeline's `WaitStage` to stagger delivery attempts so
    /// peers don't all fire a notification at once.
    pub fn peer_position(&self) -> usize {
        let mut ids: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        ids.push(self.local_id.clone());
        ids.sort();
        ids.iter().position(|id| id == &self.local_id).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_position_is_deterministic_across_peer_sets() {
        let state = ClusterState::new("b".into(), "127.0.0.1:9000".parse().unwrap());
        state.add_peer("a".into(), "127.0.0.1:9001".parse().unwrap());
        state.add_peer("c".into(), "127.0.0.1:9002".parse().unwrap());
        assert_eq!(state.peer_position(), 1);
    }

    #[test]
    fn sweep_marks_stale_peers_suspect() {
        let state = ClusterState::new("self".into(), "127.0.0.1:9000".parse().unwrap());
        let peer = state.add_peer("p1".into(), "127.0.0.1:9001".parse().unwrap());
        peer.last_seen_unix.store(crate::core::model::now_unix() - 100, Ordering::Relaxed);
        assert_eq!(state.sweep_suspects(), 1);
        assert!(peer.is_suspect());
    }
}
