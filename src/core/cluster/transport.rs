// src/core/cluster/transport.rs

//! UDP-based ping/pong membership probing, plus the wire path that carries
//! silence and notification-log deltas to peers as they're written locally.

use crate::core::cluster::state::ClusterState;
use crate::core::errors::AlertError;
use crate::core::gossip::GossipChannel;
use crate::core::model::Silence;
use crate::core::nflog::NflogEntry;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const PROBE_INTERVAL: Duration = Duration::from_secs(2);
/// Random jitter added to each probe tick so peers across the cluster don't
/// all poll each other in lockstep.
const PROBE_JITTER: Duration = Duration::from_millis(400);
const UDP_BUFFER_SIZE: usize = 65536;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum GossipKind {
    Silence,
    Nflog,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum MembershipMessage {
    Ping { sender_id: String, sender_addr: String },
    Pong { sender_id: String },
    /// A single gossiped record, broadcast to every known peer as soon as it's
    /// written locally. Peers merge it with last-write-wins semantics, so
    /// delivery doesn't need to be ordered or reliable.
    Gossip { kind: GossipKind, payload: Vec<u8> },
}

/// Runs the UDP probe cycle: periodically pings every known peer, marks peers
/// that respond as seen, answers pings/pongs addressed to this node, and
/// forwards locally-written silence/notification-log records to every peer.
pub async fn run_probe_loop(
    state: Arc<ClusterState>,
    socket: Arc<UdpSocket>,
    silences: Arc<GossipChannel<Silence>>,
    nflog: Arc<GossipChannel<NflogEntry>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(PROBE_INTERVAL);
    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    let mut silence_outbox = silences.subscribe_outbox();
    let mut nflog_outbox = nflog.subscribe_outbox();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..PROBE_JITTER.as_millis() as u64));
                tokio::time::sleep(jitter).await;
                for peer in state.peers() {
                    let msg = MembershipMessage::Ping {
                        sender_id: state.local_id.clone(),
                        sender_addr: state.local_addr.to_string(),
                    };
                    if let Ok(bytes) = encode(&msg)
                        && let Err(e) = socket.send_to(&bytes, peer.addr).await {
                        warn!(peer = %peer.id, error = %e, "failed to send membership ping");
                    }
                }
                let marked = state.sweep_suspects();
                if marked > 0 {
                    debug!(marked, "peers marked suspect after missed probes");
                }
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) => handle_datagram(&state, &socket, &silences, &nflog, &buf[..n], from).await,
                    Err(e) => warn!(error = %e, "membership socket read failed"),
                }
            }
            record = silence_outbox.recv() => {
                if let Ok(record) = record {
                    broadcast_record(&state, &socket, GossipKind::Silence, &record).await;
                }
            }
            record = nflog_outbox.recv() => {
                if let Ok(record) = record {
                    broadcast_record(&state, &socket, GossipKind::Nflog, &record).await;
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn broadcast_record<T: bincode::Encode>(state: &Arc<ClusterState>, socket: &Arc<UdpSocket>, kind: GossipKind, record: &T) {
    let Ok(payload) = crate::core::gossip::wire::encode(record) else {
        return;
    };
    let Ok(bytes) = encode(&MembershipMessage::Gossip { kind, payload }) else {
        return;
    };
    for peer in state.peers() {
        if let Err(e) = socket.send_to(&bytes, peer.addr).await {
            warn!(peer = %peer.id, error = %e, "failed to forward gossip record");
        }
    }
}

async fn handle_datagram(
    state: &Arc<ClusterState>,
    socket: &Arc<UdpSocket>,
    silences: &Arc<GossipChannel<Silence>>,
    nflog: &Arc<GossipChannel<NflogEntry>>,
    bytes: &[u8],
    from: SocketAddr,
) {
    let Ok(msg) = decode::<MembershipMessage>(bytes) else {
        return;
    };
    match msg {
        MembershipMessage::Ping { sender_id, sender_addr } => {
            let addr: SocketAddr = sender_addr.parse().unwrap_or(from);
            let peer = state.add_peer(sender_id, addr);
            peer.mark_seen();
            let pong = MembershipMessage::Pong {
                sender_id: state.local_id.clone(),
            };
            if let Ok(bytes) = encode(&pong) {
                let _ = socket.send_to(&bytes, from).await;
            }
        }
        MembershipMessage::Pong { sender_id } => {
            if let Some(peer) = state.peer(&sender_id) {
                peer.mark_seen();
            }
        }
        MembershipMessage::Gossip { kind, payload } => match kind {
            GossipKind::Silence => {
                if let Ok(record) = crate::core::gossip::wire::decode::<Silence>(&payload) {
                    silences.merge_one(record);
                }
            }
            GossipKind::Nflog => {
                if let Ok(record) = crate::core::gossip::wire::decode::<NflogEntry>(&payload) {
                    nflog.merge_one(record);
                }
            }
        },
    }
}

fn encode(msg: &MembershipMessage) -> Result<Vec<u8>, AlertError> {
    crate::core::gossip::wire::encode(msg)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, AlertError> {
    crate::core::gossip::wire::decode(bytes)
}
