// src/core/cluster/mod.rs

//! Cluster membership and the UDP gossip transport that carries silence and
//! notification-log deltas between peers. There is no primary/replica or slot
//! concept here: every peer holds the full, eventually-consistent state.

pub mod state;
pub mod transport;

pub use state::{ClusterState, Peer};
pub use transport::{GossipKind, MembershipMessage};
