//! Review and subject persistence
//!
//! Manages the reviews and subjects collections: lazy subject creation with
//! dedup on the normalized (name, city) pair, review lifecycle, and the
//! denormalized per-subject review counter.

use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use futures::stream::StreamExt;
use mongodb::options::FindOptions;
use tracing::{error, info};

use crate::db::schemas::{
    normalize_term, ReviewDoc, SubjectDoc, REVIEW_COLLECTION, SUBJECT_COLLECTION,
};
use crate::db::{is_duplicate_key_error, MongoClient, MongoCollection};
use crate::reviews::validate::NormalizedReview;
use crate::types::ConfiaError;

/// Maximum number of subjects one search returns
pub const SEARCH_LIMIT: i64 = 20;

/// Review and subject store backed by MongoDB
pub struct ReviewStore {
    subjects: MongoCollection<SubjectDoc>,
    reviews: MongoCollection<ReviewDoc>,
}

impl ReviewStore {
    /// Create a new review store
    pub async fn new(mongo: &MongoClient) -> Result<Self, ConfiaError> {
        let subjects = mongo.collection::<SubjectDoc>(SUBJECT_COLLECTION).await?;
        let reviews = mongo.collection::<ReviewDoc>(REVIEW_COLLECTION).await?;
        Ok(Self { subjects, reviews })
    }

    /// Get a subject by id
    pub async fn subject_by_id(&self, id: &ObjectId) -> Result<Option<SubjectDoc>, ConfiaError> {
        self.subjects.find_one(doc! { "_id": id }).await
    }

    /// Find a subject by its normalized (name, city) pair, creating it when
    /// absent. Inactive subjects are returned too; the caller decides whether
    /// they may still be written against.
    ///
    /// Concurrent first submissions race on the unique normalized-pair index,
    /// so a duplicate-key insert means the other writer won and we re-read.
    pub async fn resolve_or_create_subject(
        &self,
        name: &str,
        city: Option<&str>,
    ) -> Result<SubjectDoc, ConfiaError> {
        let candidate = SubjectDoc::new(name, city);
        let pair_filter = doc! {
            "normalized_name": &candidate.normalized_name,
            "normalized_city": &candidate.normalized_city,
        };

        if let Some(existing) = self.subjects.find_one(pair_filter.clone()).await? {
            return Ok(existing);
        }

        // SubjectDoc::new already stamps metadata, so the raw insert keeps
        // the driver error typed for the duplicate-key check
        match self.subjects.inner().insert_one(&candidate).await {
            Ok(result) => {
                let id = result
                    .inserted_id
                    .as_object_id()
                    .ok_or_else(|| ConfiaError::Store("Failed to get inserted ID".into()))?;
                info!(
                    "Created subject '{}' ({})",
                    candidate.display_name,
                    id.to_hex()
                );
                let mut created = candidate;
                created._id = Some(id);
                Ok(created)
            }
            Err(err) if is_duplicate_key_error(&err) => self
                .subjects
                .find_one(pair_filter)
                .await?
                .ok_or_else(|| ConfiaError::Store(format!("Subject insert raced: {}", err))),
            Err(err) => Err(ConfiaError::Store(format!("Subject insert failed: {}", err))),
        }
    }

    /// Search active subjects by name substring, optionally narrowed to a
    /// city, ordered by review count descending.
    pub async fn search_subjects(
        &self,
        name: &str,
        city: Option<&str>,
    ) -> Result<Vec<SubjectDoc>, ConfiaError> {
        let mut filter = doc! {
            "normalized_name": Bson::RegularExpression(bson::Regex {
                pattern: escape_regex(&normalize_term(name)),
                options: String::new(),
            }),
            "active": true,
            "metadata.is_deleted": { "$ne": true },
        };
        if let Some(city) = city {
            filter.insert("normalized_city", normalize_term(city));
        }

        let options = FindOptions::builder()
            .sort(doc! { "review_count": -1 })
            .limit(SEARCH_LIMIT)
            .build();

        let cursor = self
            .subjects
            .inner()
            .find(filter)
            .with_options(options)
            .await
            .map_err(|e| ConfiaError::Store(format!("Subject search failed: {}", e)))?;

        let results: Vec<SubjectDoc> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading subject: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Insert a new review against an existing subject and bump the
    /// subject's review counter.
    pub async fn insert_review(
        &self,
        subject_id: ObjectId,
        author_id: Option<String>,
        review: &NormalizedReview,
    ) -> Result<ObjectId, ConfiaError> {
        let id = self
            .reviews
            .insert_one(build_review(subject_id, author_id, review))
            .await?;

        self.bump_review_count(&subject_id, 1).await?;
        Ok(id)
    }

    /// Replace the body of the caller's own review, snapshotting the prior
    /// body into the edit history.
    ///
    /// The author filter makes anonymous reviews unreachable here: they carry
    /// no author, so nobody can claim them for editing. The subject reference
    /// and the anonymous flag never change.
    pub async fn update_review(
        &self,
        id: &ObjectId,
        author_id: &str,
        review: &NormalizedReview,
    ) -> Result<Option<ReviewDoc>, ConfiaError> {
        let filter = doc! { "_id": id, "author_id": author_id };

        let existing = match self.reviews.find_one(filter.clone()).await? {
            Some(existing) => existing,
            None => return Ok(None),
        };

        let update = build_edit(&existing, review)?;
        self.reviews.find_one_and_update(filter, update).await
    }

    /// Soft-delete the caller's own review and decrement the subject's
    /// counter. Returns false when no matching live review exists.
    ///
    /// The delete itself is a guarded find-and-update so that concurrent
    /// deletes of the same review decrement the counter once.
    pub async fn delete_review(&self, id: &ObjectId, author_id: &str) -> Result<bool, ConfiaError> {
        let deleted = self
            .reviews
            .find_one_and_update(
                doc! { "_id": id, "author_id": author_id },
                doc! {
                    "$set": {
                        "metadata.is_deleted": true,
                        "metadata.deleted_at": DateTime::now(),
                        "metadata.updated_at": DateTime::now(),
                    }
                },
            )
            .await?;

        match deleted {
            Some(review) => {
                self.bump_review_count(&review.subject_id, -1).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All live reviews of one subject
    pub async fn reviews_for_subject(
        &self,
        subject_id: &ObjectId,
    ) -> Result<Vec<ReviewDoc>, ConfiaError> {
        self.reviews.find_many(doc! { "subject_id": subject_id }).await
    }

    /// All live reviews written by one author, newest first
    pub async fn reviews_by_author(&self, author_id: &str) -> Result<Vec<ReviewDoc>, ConfiaError> {
        let mut reviews = self
            .reviews
            .find_many(doc! { "author_id": author_id })
            .await?;
        reviews.sort_by(|a, b| b.metadata.created_at.cmp(&a.metadata.created_at));
        Ok(reviews)
    }

    async fn bump_review_count(&self, subject_id: &ObjectId, delta: i64) -> Result<(), ConfiaError> {
        self.subjects
            .update_one(
                doc! { "_id": subject_id },
                doc! {
                    "$inc": { "review_count": delta },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .await?;
        Ok(())
    }
}

/// Build the stored document for a new review
fn build_review(
    subject_id: ObjectId,
    author_id: Option<String>,
    review: &NormalizedReview,
) -> ReviewDoc {
    ReviewDoc {
        _id: None,
        metadata: Default::default(),
        subject_id,
        author_id,
        ratings: review.ratings,
        narrative: review.narrative.clone(),
        positive_flags: review.positive_flags.iter().cloned().collect(),
        negative_flags: review.negative_flags.iter().cloned().collect(),
        anonymous: review.anonymous,
        public: review.public,
        city: review.city.clone(),
        contact: review.contact.clone(),
        history: Vec::new(),
    }
}

/// Build the update document for an edit: replace the body, push the prior
/// body onto the history, clear city/contact when the new body omits them.
fn build_edit(existing: &ReviewDoc, review: &NormalizedReview) -> Result<Document, ConfiaError> {
    let snapshot = bson::to_bson(&existing.snapshot())
        .map_err(|e| ConfiaError::Store(format!("Failed to encode history entry: {}", e)))?;
    let ratings = bson::to_bson(&review.ratings)
        .map_err(|e| ConfiaError::Store(format!("Failed to encode ratings: {}", e)))?;

    let mut set = doc! {
        "ratings": ratings,
        "narrative": &review.narrative,
        "positive_flags": review.positive_flags.iter().cloned().collect::<Vec<_>>(),
        "negative_flags": review.negative_flags.iter().cloned().collect::<Vec<_>>(),
        "public": review.public,
        "metadata.updated_at": DateTime::now(),
    };
    let mut unset = Document::new();

    match &review.city {
        Some(city) => {
            set.insert("city", city);
        }
        None => {
            unset.insert("city", "");
        }
    }
    match &review.contact {
        Some(contact) => {
            set.insert("contact", contact);
        }
        None => {
            unset.insert("contact", "");
        }
    }

    let mut update = doc! {
        "$set": set,
        "$push": { "history": snapshot },
    };
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }

    Ok(update)
}

/// Escape a term for literal use inside a stored regular expression
fn escape_regex(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(
            c,
            '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '\\'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::Ratings;
    use std::collections::BTreeSet;

    fn normalized(narrative: &str) -> NormalizedReview {
        NormalizedReview {
            subject_id: None,
            subject_name: Some("Ana".to_string()),
            city: Some("Recife".to_string()),
            contact: None,
            ratings: Ratings {
                behavior: 4,
                ..Default::default()
            },
            narrative: narrative.to_string(),
            positive_flags: BTreeSet::from(["respectful".to_string()]),
            negative_flags: BTreeSet::new(),
            anonymous: false,
            public: true,
        }
    }

    #[test]
    fn test_escape_regex_neutralizes_metacharacters() {
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("(ana)"), "\\(ana\\)");
        assert_eq!(escape_regex("plain name"), "plain name");
    }

    #[test]
    fn test_build_review_carries_flags_and_authorship() {
        let subject_id = ObjectId::new();
        let doc = build_review(subject_id, Some("u1".to_string()), &normalized("fine"));

        assert_eq!(doc.subject_id, subject_id);
        assert_eq!(doc.author_id.as_deref(), Some("u1"));
        assert_eq!(doc.positive_flags, vec!["respectful".to_string()]);
        assert!(doc.history.is_empty());
        assert!(doc.public);
    }

    #[test]
    fn test_build_edit_pushes_history_and_clears_omitted_fields() {
        let existing = ReviewDoc {
            narrative: "original".to_string(),
            city: Some("Recife".to_string()),
            contact: Some("@ana".to_string()),
            ..Default::default()
        };
        let mut edit = normalized("revised");
        edit.city = None;
        edit.contact = None;

        let update = build_edit(&existing, &edit).unwrap();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("narrative").unwrap(), "revised");
        assert!(set.get("city").is_none());

        let unset = update.get_document("$unset").unwrap();
        assert!(unset.contains_key("city"));
        assert!(unset.contains_key("contact"));

        let pushed = update
            .get_document("$push")
            .unwrap()
            .get_document("history")
            .unwrap();
        assert_eq!(pushed.get_str("narrative").unwrap(), "original");
    }

    #[test]
    fn test_build_edit_keeps_supplied_city() {
        let existing = ReviewDoc::default();
        let update = build_edit(&existing, &normalized("revised")).unwrap();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("city").unwrap(), "Recife");
        assert!(update.get("$unset").map_or(true, |u| {
            !u.as_document().map_or(false, |d| d.contains_key("city"))
        }));
    }
}
