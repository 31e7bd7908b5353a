//! Analytics event logging
//!
//! Logs product events in JSONL format for offline analysis. Logging is
//! best-effort: serialization or IO failures are reported and dropped,
//! never propagated into request handling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Analytics event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A review was accepted and stored
    ReviewSubmitted,
    /// An existing review was edited by its author
    ReviewUpdated,
    /// A reputation lookup was served
    ReputationQueried,
    /// A free query or credit was consumed
    AccessConsumed,
    /// A gated operation was refused at the paywall
    AccessBlocked,
    /// A billing webhook was processed
    BillingEventProcessed,
    /// An emergency alert was dispatched
    AlertTriggered,
    /// A safe date session changed state
    DateSessionChanged,
}

/// One analytics event, serialized as a JSONL line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event type
    pub event_type: EventType,
    /// Gateway node that handled the request
    pub node_id: String,
    /// User identifier (if authenticated)
    pub user_id: Option<String>,
    /// Subject the event concerns (reviews, lookups)
    pub subject_id: Option<String>,
    /// Operation or state name, event-type specific
    pub operation: Option<String>,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AnalyticsEvent {
    pub fn new(event_type: EventType, node_id: String) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            node_id,
            user_id: None,
            subject_id: None,
            operation: None,
            metadata: None,
        }
    }

    pub fn with_user(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_subject(mut self, subject_id: String) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    pub fn with_operation(mut self, operation: String) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Analytics logger that writes events to a JSONL file
#[derive(Clone)]
pub struct AnalyticsLogger {
    inner: Arc<Mutex<AnalyticsLoggerInner>>,
    node_id: String,
}

struct AnalyticsLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl AnalyticsLogger {
    pub fn new(node_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AnalyticsLoggerInner {
                writer: None,
                path: None,
            })),
            node_id,
        }
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = BufWriter::new(file);

        let mut inner = self.inner.lock().await;
        inner.writer = Some(writer);
        inner.path = Some(path.clone());

        info!("Analytics logging initialized to {}", path.display());
        Ok(())
    }

    /// Log an analytics event
    pub async fn log(&self, event: AnalyticsEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize analytics event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write analytics event: {}", e);
            }
            // Flush per event; the volume is low and losing tail events
            // on crash defeats the point of the log
            if let Err(e) = writer.flush() {
                error!("Failed to flush analytics log: {}", e);
            }
        }
    }

    /// Log a stored review (submission or edit)
    pub async fn log_review(&self, updated: bool, user_id: Option<&str>, subject_id: &str) {
        let event_type = if updated {
            EventType::ReviewUpdated
        } else {
            EventType::ReviewSubmitted
        };
        let mut event = AnalyticsEvent::new(event_type, self.node_id.clone())
            .with_subject(subject_id.to_string());
        if let Some(uid) = user_id {
            event = event.with_user(uid.to_string());
        }
        self.log(event).await;
    }

    /// Log a served reputation lookup
    pub async fn log_reputation_query(
        &self,
        user_id: &str,
        subject_id: &str,
        full_result: bool,
    ) {
        let event = AnalyticsEvent::new(EventType::ReputationQueried, self.node_id.clone())
            .with_user(user_id.to_string())
            .with_subject(subject_id.to_string())
            .with_metadata(serde_json::json!({ "fullResult": full_result }));
        self.log(event).await;
    }

    /// Log a metered consumption or refusal
    pub async fn log_access(&self, user_id: &str, kind: &str, consumed: bool) {
        let event_type = if consumed {
            EventType::AccessConsumed
        } else {
            EventType::AccessBlocked
        };
        let event = AnalyticsEvent::new(event_type, self.node_id.clone())
            .with_user(user_id.to_string())
            .with_operation(kind.to_string());
        self.log(event).await;
    }

    /// Log a processed billing webhook
    pub async fn log_billing(&self, user_id: &str, event_type: &str, outcome: &str) {
        let event = AnalyticsEvent::new(EventType::BillingEventProcessed, self.node_id.clone())
            .with_user(user_id.to_string())
            .with_operation(event_type.to_string())
            .with_metadata(serde_json::json!({ "outcome": outcome }));
        self.log(event).await;
    }

    /// Log an emergency alert dispatch
    pub async fn log_alert(&self, user_id: &str, contacts_notified: usize) {
        let event = AnalyticsEvent::new(EventType::AlertTriggered, self.node_id.clone())
            .with_user(user_id.to_string())
            .with_metadata(serde_json::json!({ "contactsNotified": contacts_notified }));
        self.log(event).await;
    }

    /// Log a safe date session transition
    pub async fn log_date_session(&self, user_id: &str, state: &str) {
        let event = AnalyticsEvent::new(EventType::DateSessionChanged, self.node_id.clone())
            .with_user(user_id.to_string())
            .with_operation(state.to_string());
        self.log(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = AnalyticsEvent::new(EventType::ReputationQueried, "node-1".to_string())
            .with_user("user-123".to_string())
            .with_subject("65f0a1b2c3d4e5f6a7b8c9d0".to_string());

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("reputation_queried"));
        assert!(jsonl.contains("user-123"));
        assert!(jsonl.contains("65f0a1b2c3d4e5f6a7b8c9d0"));
    }

    #[test]
    fn test_metadata_round_trip() {
        let event = AnalyticsEvent::new(EventType::AccessBlocked, "node-1".to_string())
            .with_operation("FREE_QUERY".to_string())
            .with_metadata(serde_json::json!({ "reason": "FREE_LIMIT_REACHED" }));

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("access_blocked"));
        assert!(jsonl.contains("FREE_LIMIT_REACHED"));

        let parsed: AnalyticsEvent = serde_json::from_str(&jsonl).unwrap();
        assert_eq!(parsed.event_type, EventType::AccessBlocked);
    }

    #[tokio::test]
    async fn test_uninitialized_logger_drops_events() {
        let logger = AnalyticsLogger::new("node-1".to_string());
        // No file configured; logging is a no-op rather than an error.
        logger.log_access("u1", "CREDIT", true).await;
    }
}
