//! Outbound alert dispatch.
//!
//! Alerts are raised on chain-integrity breaks and on score-driven
//! escalations. Delivery (channels, retries) belongs to the dispatcher
//! implementation; callers fire and move on.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Severity;

/// A single alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// How loud this alert should be.
    pub severity: Severity,
    /// Short human-readable title.
    pub title: String,
    /// Longer description.
    pub message: String,
    /// Structured context (never raw personal data).
    pub metadata: BTreeMap<String, String>,
}

impl Alert {
    /// Create an alert with no metadata.
    #[must_use]
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata field.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Sink for outbound alerts.
///
/// Implementations must not block for long: `notify` is awaited inline on
/// the gating path before a decision is returned.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Deliver an alert. Delivery failures are the dispatcher's concern.
    async fn notify(&self, alert: Alert);
}

/// Dispatcher that writes alerts to the tracing pipeline.
///
/// Used when no external notification channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertDispatcher;

#[async_trait]
impl AlertDispatcher for TracingAlertDispatcher {
    async fn notify(&self, alert: Alert) {
        let metadata = serde_json::to_string(&alert.metadata).unwrap_or_default();
        match alert.severity {
            Severity::Critical | Severity::High => tracing::error!(
                severity = %alert.severity,
                title = %alert.title,
                metadata = %metadata,
                "{}",
                alert.message
            ),
            Severity::Medium => tracing::warn!(
                severity = %alert.severity,
                title = %alert.title,
                metadata = %metadata,
                "{}",
                alert.message
            ),
            Severity::Low => tracing::info!(
                severity = %alert.severity,
                title = %alert.title,
                metadata = %metadata,
                "{}",
                alert.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_builder() {
        let alert = Alert::new(Severity::High, "blocked", "ip blocked")
            .with_meta("score", 75)
            .with_meta("ttl_secs", 3600);

        assert_eq!(alert.metadata.get("score").map(String::as_str), Some("75"));
        assert_eq!(alert.metadata.len(), 2);
    }

    #[tokio::test]
    async fn test_tracing_dispatcher_does_not_panic() {
        let dispatcher = TracingAlertDispatcher;
        dispatcher
            .notify(Alert::new(Severity::Critical, "chain", "broken at 3"))
            .await;
    }
}
