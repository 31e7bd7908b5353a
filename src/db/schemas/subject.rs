//! Subject document schema
//!
//! A subject is the third party being reviewed, not a system user. Subjects
//! are created lazily on first review submission and deduplicated by the
//! normalized (name, city) pair.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for subjects
pub const SUBJECT_COLLECTION: &str = "subjects";

/// Lowercase, trim, and collapse inner whitespace for matching
pub fn normalize_term(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Subject document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SubjectDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Name as first submitted
    pub display_name: String,

    /// City as first submitted, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    /// Lowercased, whitespace-collapsed name used for dedup and search
    pub normalized_name: String,

    /// Lowercased, whitespace-collapsed city; empty string when no city
    #[serde(default)]
    pub normalized_city: String,

    /// Inactive subjects are hidden from search
    #[serde(default = "default_true")]
    pub active: bool,

    /// Denormalized count of non-deleted reviews
    #[serde(default)]
    pub review_count: i64,
}

fn default_true() -> bool {
    true
}

impl SubjectDoc {
    /// Create a new subject from submitted name and city
    pub fn new(display_name: &str, city: Option<&str>) -> Self {
        let display_name = display_name.trim().to_string();
        let city = city.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        Self {
            _id: None,
            metadata: Metadata::new(),
            normalized_name: normalize_term(&display_name),
            normalized_city: city.as_deref().map(normalize_term).unwrap_or_default(),
            display_name,
            city,
            active: true,
            review_count: 0,
        }
    }
}

impl IntoIndexes for SubjectDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Dedup on the normalized pair; concurrent first-submissions for
            // the same subject race on this index rather than double-creating
            (
                doc! { "normalized_name": 1, "normalized_city": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("normalized_pair_unique".to_string())
                        .build(),
                ),
            ),
            // Search by name prefix/substring scans this index
            (
                doc! { "normalized_name": 1 },
                Some(
                    IndexOptions::builder()
                        .name("normalized_name_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for SubjectDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term("  João   da Silva "), "joão da silva");
        assert_eq!(normalize_term("SÃO PAULO"), "são paulo");
        assert_eq!(normalize_term(""), "");
    }

    #[test]
    fn test_new_subject_normalizes_pair() {
        let subject = SubjectDoc::new("  Carlos  Mendes ", Some(" Rio de Janeiro "));
        assert_eq!(subject.display_name, "Carlos  Mendes");
        assert_eq!(subject.normalized_name, "carlos mendes");
        assert_eq!(subject.normalized_city, "rio de janeiro");
        assert!(subject.active);
        assert_eq!(subject.review_count, 0);
    }

    #[test]
    fn test_new_subject_without_city() {
        let subject = SubjectDoc::new("Ana", None);
        assert_eq!(subject.city, None);
        assert_eq!(subject.normalized_city, "");
    }
}
