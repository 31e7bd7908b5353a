//! Safe date session document schema
//!
//! A safe date session is opened before a meeting, optionally notifying the
//! user's emergency contacts, and is closed with a check-in ("I'm safe") or
//! escalated with an SOS.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for safe date sessions
pub const DATE_SESSION_COLLECTION: &str = "date_sessions";

/// Date session status
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DateSessionStatus {
    /// Session opened, no check-in yet
    #[default]
    Active,
    /// User checked in safe; session closed
    CheckedIn,
    /// User triggered SOS; contacts alerted
    Sos,
}

/// Safe date session document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DateSessionDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning user; sessions are only visible to their creator
    pub user_id: String,

    /// Who the user is meeting, as they described it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,

    /// Where the meeting takes place
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default)]
    pub status: DateSessionStatus,

    pub started_at: DateTime,

    /// Set when the session leaves `active` (check-in or SOS)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime>,
}

impl DateSessionDoc {
    pub fn new(user_id: &str, subject_name: Option<String>, location: Option<String>) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id: user_id.to_string(),
            subject_name,
            location,
            status: DateSessionStatus::Active,
            started_at: DateTime::now(),
            closed_at: None,
        }
    }
}

impl IntoIndexes for DateSessionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1, "status": 1 },
            Some(
                IndexOptions::builder()
                    .name("user_status_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for DateSessionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
