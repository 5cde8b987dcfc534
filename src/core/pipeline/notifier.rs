// src/core/pipeline/notifier.rs

//! The notifier boundary: the pipeline's `RetryStage` delivers a rendered
//! group of alerts to a `Notifier`. Concrete transports (email, webhook,
//! chat ops) live outside this crate; a `LogNotifier` is provided for tests
//! and for operators who just want structured log lines.

use crate::core::errors::AlertError;
use crate::core::model::StoredAlert;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Notification {
    pub receiver: String,
    pub group_key: String,
    pub group_labels: crate::core::model::Labels,
    pub alerts: Vec<Arc<StoredAlert>>,
}

/// Implemented by each outbound transport. `notify` should return a transient
/// error (retryable) for failures like connection timeouts, and a permanent
/// error for failures like a 4xx rejection from the receiving endpoint.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, notification: &Notification) -> Result<(), AlertError>;
}

/// A notifier that logs the notification at info level instead of delivering
/// it anywhere. Used in tests and as a safe default receiver.
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, notification: &Notification) -> Result<(), AlertError> {
        info!(
            receiver = %notification.receiver,
            group_key = %notification.group_key,
            alerts = notification.alerts.len(),
            "notification delivered"
        );
        Ok(())
    }
}
