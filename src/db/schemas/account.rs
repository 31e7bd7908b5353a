//! Account document schema
//!
//! Stores a user's plan/credit state and safety contacts. The user identity
//! itself lives with the hosted auth provider; this document is keyed by the
//! provider's user id and created lazily on first touch.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for accounts
pub const ACCOUNT_COLLECTION: &str = "accounts";

/// Account document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AccountDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Auth-provider user id
    pub user_id: String,

    /// Email reported by the auth provider, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Plan identifier as last reported by billing. Unknown values are
    /// treated as free when resolving entitlements.
    #[serde(default = "default_plan")]
    pub plan: String,

    /// Plan expiry; absent means non-expiring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_expires_at: Option<DateTime>,

    /// Purchased consumable credits, never negative
    #[serde(default)]
    pub credit_balance: i64,

    /// Free-tier queries consumed so far, monotonically increasing
    #[serde(default)]
    pub free_queries_used: i64,

    /// Phone numbers notified by the emergency-alert feature
    #[serde(default)]
    pub emergency_contacts: Vec<String>,
}

fn default_plan() -> String {
    "free".to_string()
}

impl AccountDoc {
    /// Create a fresh free-tier account
    pub fn new(user_id: &str, email: Option<&str>) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            user_id: user_id.to_string(),
            email: email.map(|e| e.to_string()),
            plan: default_plan(),
            plan_expires_at: None,
            credit_balance: 0,
            free_queries_used: 0,
            emergency_contacts: Vec::new(),
        }
    }
}

impl IntoIndexes for AccountDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("user_id_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for AccountDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
