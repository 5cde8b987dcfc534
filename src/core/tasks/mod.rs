// src/core/tasks/mod.rs

//! Long-running background tasks that support the server's core functionality:
//! periodic garbage collection of resolved alerts, expired silences and stale
//! notification-log entries, and periodic gossip-channel snapshotting.

pub mod gc;
pub mod snapshot;
