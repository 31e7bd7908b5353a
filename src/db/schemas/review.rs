//! Review document schema
//!
//! A review is one user's account of one subject: five ratings, a written
//! narrative, and optional behavioral tags. Edits append snapshots of the
//! prior body; deletion is soft.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for reviews
pub const REVIEW_COLLECTION: &str = "reviews";

/// The five rating dimensions of a review.
///
/// Each value is an integer in [1,5] once accepted; 0 means "not supplied"
/// and never contributes to a mean.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ratings {
    pub behavior: i32,
    pub emotional_safety: i32,
    pub respect: i32,
    pub character: i32,
    pub trust: i32,
}

impl Ratings {
    /// All five values in declaration order
    pub fn values(&self) -> [i32; 5] {
        [
            self.behavior,
            self.emotional_safety,
            self.respect,
            self.character,
            self.trust,
        ]
    }

    /// Arithmetic mean of the supplied (non-zero) ratings.
    ///
    /// A missing rating is excluded from the divisor, never counted as zero.
    /// Returns None when no rating was supplied at all.
    pub fn mean(&self) -> Option<f64> {
        let supplied: Vec<i32> = self.values().into_iter().filter(|v| *v != 0).collect();
        if supplied.is_empty() {
            return None;
        }
        let sum: i32 = supplied.iter().sum();
        Some(f64::from(sum) / supplied.len() as f64)
    }
}

/// Snapshot of a review body taken immediately before an edit
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReviewSnapshot {
    pub edited_at: DateTime,
    pub ratings: Ratings,
    pub narrative: String,
    #[serde(default)]
    pub positive_flags: Vec<String>,
    #[serde(default)]
    pub negative_flags: Vec<String>,
    pub public: bool,
}

/// Review document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ReviewDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at, is_deleted)
    #[serde(default)]
    pub metadata: Metadata,

    /// Reviewed subject; immutable after creation
    pub subject_id: ObjectId,

    /// Submitting user; None iff `anonymous` is true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,

    pub ratings: Ratings,

    pub narrative: String,

    /// Canonical positive tag slugs, deduplicated
    #[serde(default)]
    pub positive_flags: Vec<String>,

    /// Canonical negative tag slugs, deduplicated
    #[serde(default)]
    pub negative_flags: Vec<String>,

    /// When true the review is never attributable, even internally
    pub anonymous: bool,

    /// Governs whether the review contributes to other viewers' aggregates
    pub public: bool,

    /// Where the reviewed encounter took place, trimmed-to-null
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    /// Contact handle of the subject as the author knew it, trimmed-to-null
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    /// Append-only history of prior bodies, one entry per edit
    #[serde(default)]
    pub history: Vec<ReviewSnapshot>,
}

impl ReviewDoc {
    /// Snapshot the current body for the edit history
    pub fn snapshot(&self) -> ReviewSnapshot {
        ReviewSnapshot {
            edited_at: DateTime::now(),
            ratings: self.ratings,
            narrative: self.narrative.clone(),
            positive_flags: self.positive_flags.clone(),
            negative_flags: self.negative_flags.clone(),
            public: self.public,
        }
    }
}

impl IntoIndexes for ReviewDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Reviews are fetched by subject for aggregation
            (
                doc! { "subject_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("subject_id_index".to_string())
                        .build(),
                ),
            ),
            // Authors list and edit their own reviews
            (
                doc! { "author_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("author_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ReviewDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_excludes_missing_ratings() {
        let ratings = Ratings {
            behavior: 5,
            ..Default::default()
        };
        assert_eq!(ratings.mean(), Some(5.0));
    }

    #[test]
    fn test_mean_over_all_supplied() {
        let ratings = Ratings {
            behavior: 5,
            emotional_safety: 4,
            respect: 5,
            character: 4,
            trust: 2,
        };
        assert_eq!(ratings.mean(), Some(4.0));
    }

    #[test]
    fn test_mean_of_nothing_is_none() {
        assert_eq!(Ratings::default().mean(), None);
    }

    #[test]
    fn test_ratings_camel_case_keys() {
        let json = serde_json::to_value(Ratings {
            behavior: 3,
            emotional_safety: 2,
            respect: 0,
            character: 0,
            trust: 1,
        })
        .unwrap();
        assert_eq!(json["emotionalSafety"], 2);
        assert_eq!(json["trust"], 1);
    }
}
