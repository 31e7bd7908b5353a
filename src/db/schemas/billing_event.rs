//! Billing event document schema
//!
//! One document per processed webhook delivery, keyed by the provider's
//! event id. The unique index is what makes webhook processing idempotent:
//! a replayed event fails the insert and is acknowledged without effect.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for processed billing events
pub const BILLING_EVENT_COLLECTION: &str = "billing_events";

/// Processed billing event record
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BillingEventDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Provider's unique event id (idempotency key)
    pub event_id: String,

    /// Provider event type, e.g. `subscription.activated`
    pub event_type: String,

    /// Account the event applied to
    pub user_id: String,

    pub received_at: DateTime,
}

impl BillingEventDoc {
    pub fn new(event_id: &str, event_type: &str, user_id: &str) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            user_id: user_id.to_string(),
            received_at: DateTime::now(),
        }
    }
}

impl IntoIndexes for BillingEventDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "event_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("event_id_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for BillingEventDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
