// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum AlertError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("invalid_matcher: {0}")]
    InvalidMatcher(String),

    #[error("invalid_alert: {0}")]
    InvalidAlert(String),

    #[error("invalid_silence: {0}")]
    InvalidSilence(String),

    #[error("silence not found: {0}")]
    SilenceNotFound(uuid::Uuid),

    #[error("rate limited")]
    RateLimited,

    #[error("snapshot corrupt at byte {offset}: {reason}")]
    SnapshotCorrupt { offset: usize, reason: String },

    #[error("gossip encode error: {0}")]
    Encode(String),

    #[error("gossip decode error: {0}")]
    Decode(String),

    #[error("notifier '{receiver}' permanently failed: {reason}")]
    NotifyPermanent { receiver: String, reason: String },

    #[error("notifier '{receiver}' transiently failed: {reason}")]
    NotifyTransient { receiver: String, reason: String },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PartialEq for AlertError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AlertError::Io(a), AlertError::Io(b)) => a.to_string() == b.to_string(),
            (AlertError::InvalidMatcher(a), AlertError::InvalidMatcher(b)) => a == b,
            (AlertError::InvalidAlert(a), AlertError::InvalidAlert(b)) => a == b,
            (AlertError::InvalidSilence(a), AlertError::InvalidSilence(b)) => a == b,
            (AlertError::SilenceNotFound(a), AlertError::SilenceNotFound(b)) => a == b,
            (AlertError::RateLimited, AlertError::RateLimited) => true,
            (AlertError::Cancelled, AlertError::Cancelled) => true,
            (AlertError::Config(a), AlertError::Config(b)) => a == b,
            (AlertError::Internal(a), AlertError::Internal(b)) => a == b,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for AlertError {
    fn from(e: std::io::Error) -> Self {
        AlertError::Io(Arc::new(e))
    }
}

impl From<regex::Error> for AlertError {
    fn from(e: regex::Error) -> Self {
        AlertError::InvalidMatcher(e.to_string())
    }
}

impl From<serde_json::Error> for AlertError {
    fn from(e: serde_json::Error) -> Self {
        AlertError::Internal(format!("json error: {e}"))
    }
}

impl From<toml::de::Error> for AlertError {
    fn from(e: toml::de::Error) -> Self {
        AlertError::Config(e.to_string())
    }
}

/// The status family an (out-of-scope) HTTP layer would map an error to, per §7:
/// validation -> 400, admission control -> 429, everything else -> 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    RateLimited,
    Internal,
}

impl AlertError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AlertError::InvalidMatcher(_)
            | AlertError::InvalidAlert(_)
            | AlertError::InvalidSilence(_)
            | AlertError::SilenceNotFound(_) => ErrorClass::Validation,
            AlertError::RateLimited => ErrorClass::RateLimited,
            _ => ErrorClass::Internal,
        }
    }
}
