//! Lifecycle metadata embedded in every stored document
//!
//! Deletion is always soft: reviews a user withdraws stay in the collection
//! with `is_deleted` set, and every read filters on that flag.

use bson::DateTime;
use serde::{Deserialize, Serialize};

/// Creation, update, and soft-deletion stamps shared by all collections
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,

    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// Soft-deletion flag; absent counts as live
    #[serde(default)]
    pub is_deleted: bool,

    /// When the document was soft-deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,
}

impl Metadata {
    /// Metadata for a freshly created document; both stamps carry the same
    /// instant.
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            created_at: Some(now),
            updated_at: Some(now),
            is_deleted: false,
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stamps_match() {
        let metadata = Metadata::new();
        assert_eq!(metadata.created_at, metadata.updated_at);
        assert!(!metadata.is_deleted);
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        // Live documents must not serialize a deleted_at key, and documents
        // written without metadata must deserialize as not deleted
        let live = bson::to_document(&Metadata::new()).unwrap();
        assert!(!live.contains_key("deleted_at"));

        let legacy: Metadata = bson::from_document(bson::doc! {}).unwrap();
        assert!(!legacy.is_deleted);
    }
}
