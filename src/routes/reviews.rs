//! HTTP routes for review submission and lifecycle
//!
//! Provides REST API endpoints for reviews:
//! - POST   /api/v1/reviews        - Submit a review
//! - GET    /api/v1/reviews/mine   - List the caller's reviews
//! - PUT    /api/v1/reviews/{id}   - Edit the caller's review
//! - DELETE /api/v1/reviews/{id}   - Soft-delete the caller's review
//!
//! Submission is gated by the resolved entitlement (`can_submit_review`);
//! nothing is consumed here. Quota and credits are spent on gated reads and
//! explicit consume calls, not on writes.

use bson::oid::ObjectId;
use chrono::Utc;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{authenticate, maybe_authenticate};
use crate::db::schemas::{AccountDoc, Ratings, ReviewDoc};
use crate::entitlements::resolve;
use crate::reviews::{validate, validate_edit, SubmitReviewRequest};
use crate::routes::{
    cors_preflight, error_response, json_response, method_not_allowed, not_found,
    parse_json_body, paywall_response, service_unavailable, BoxBody,
};
use crate::server::AppState;
use crate::types::ConfiaError;

const REVIEW_PREFIX: &str = "/api/v1/reviews";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReviewResponse {
    pub success: bool,
    pub id: String,
    pub subject_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub id: String,
    pub subject_id: String,
    pub ratings: Ratings,
    pub narrative: String,
    pub positive_flags: Vec<String>,
    pub negative_flags: Vec<String>,
    pub anonymous: bool,
    pub public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub edit_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<&ReviewDoc> for ReviewResponse {
    fn from(doc: &ReviewDoc) -> Self {
        Self {
            id: doc._id.map(|id| id.to_hex()).unwrap_or_default(),
            subject_id: doc.subject_id.to_hex(),
            ratings: doc.ratings,
            narrative: doc.narrative.clone(),
            positive_flags: doc.positive_flags.clone(),
            negative_flags: doc.negative_flags.clone(),
            anonymous: doc.anonymous,
            public: doc.public,
            city: doc.city.clone(),
            contact: doc.contact.clone(),
            edit_count: doc.history.len(),
            created_at: doc.metadata.created_at.map(|d| d.to_chrono().to_rfc3339()),
            updated_at: doc.metadata.updated_at.map(|d| d.to_chrono().to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MyReviewsResponse {
    pub reviews: Vec<ReviewResponse>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/v1/reviews
///
/// Flow:
/// 1. Authenticate from headers (optional for anonymous submissions)
/// 2. Reject non-anonymous submissions without a session (401, not 400)
/// 3. Validate the payload, collecting every violation
/// 4. Gate on the resolved entitlement's `can_submit_review`
/// 5. Resolve or lazily create the subject
/// 6. Persist and answer 201
async fn handle_submit(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let auth = match maybe_authenticate(&req, &state.jwt) {
        Ok(a) => a,
        Err(e) => return error_response(&e),
    };

    let payload: SubmitReviewRequest = match parse_json_body(req, state.args.max_body_bytes).await
    {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    if requires_session(&payload, auth.is_some()) {
        return error_response(&ConfiaError::Auth(
            "Authentication required when anonymous is false".into(),
        ));
    }

    let normalized = match validate(&payload, &state.args.validation_policy()) {
        Ok(n) => n,
        Err(violations) => return error_response(&ConfiaError::Validation(violations)),
    };

    // Submission is a paid capability. Callers without an account resolve
    // against a blank free account and hit the paywall.
    let entitlement = match &auth {
        Some(ctx) => match state.ledger.account(&ctx.user_id).await {
            Ok(account) => resolve(&account, Utc::now()),
            Err(e) => return error_response(&e),
        },
        None => resolve(&AccountDoc::default(), Utc::now()),
    };
    if !entitlement.can_submit_review {
        if let Some(ctx) = &auth {
            state
                .analytics
                .log_access(&ctx.user_id, "submit_review", false)
                .await;
        }
        let code = entitlement
            .block_reason
            .map(|reason| reason.as_str())
            .unwrap_or("PAYWALL");
        return paywall_response(
            "Submitting reviews requires an active plan or credits",
            code,
            entitlement.plan.as_str(),
            entitlement.credits,
        );
    }

    let store = match &state.store {
        Some(store) => store,
        None => return service_unavailable("Reviews are unavailable without storage"),
    };

    let subject = if let Some(raw_id) = &normalized.subject_id {
        let oid = match ObjectId::parse_str(raw_id) {
            Ok(oid) => oid,
            Err(_) => {
                return error_response(&ConfiaError::Validation(vec![
                    "subjectId is not a valid id".to_string(),
                ]))
            }
        };
        match store.subject_by_id(&oid).await {
            Ok(Some(subject)) => subject,
            Ok(None) => return not_found("Subject not found"),
            Err(e) => return error_response(&e),
        }
    } else {
        // The validator guarantees a name is present when the id is absent
        let name = normalized.subject_name.as_deref().unwrap_or_default();
        match store
            .resolve_or_create_subject(name, normalized.city.as_deref())
            .await
        {
            Ok(subject) => subject,
            Err(e) => return error_response(&e),
        }
    };

    if !subject.active {
        return error_response(&ConfiaError::Validation(vec![
            "subject is not accepting reviews".to_string(),
        ]));
    }

    let subject_id = match subject._id {
        Some(id) => id,
        None => return error_response(&ConfiaError::Store("Subject has no id".into())),
    };

    let author_id = if normalized.anonymous {
        None
    } else {
        auth.as_ref().map(|ctx| ctx.user_id.clone())
    };

    let review_id = match store
        .insert_review(subject_id, author_id.clone(), &normalized)
        .await
    {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    state
        .analytics
        .log_review(false, author_id.as_deref(), &subject_id.to_hex())
        .await;

    json_response(
        StatusCode::CREATED,
        &SubmitReviewResponse {
            success: true,
            id: review_id.to_hex(),
            subject_id: subject_id.to_hex(),
        },
    )
}

/// GET /api/v1/reviews/mine
///
/// The caller's own reviews, newest first, including non-public ones.
/// Anonymous submissions carry no author and are not listed here.
async fn handle_mine(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let store = match &state.store {
        Some(store) => store,
        None => return service_unavailable("Reviews are unavailable without storage"),
    };

    match store.reviews_by_author(&ctx.user_id).await {
        Ok(reviews) => json_response(
            StatusCode::OK,
            &MyReviewsResponse {
                reviews: reviews.iter().map(ReviewResponse::from).collect(),
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// PUT /api/v1/reviews/{id}
///
/// Replace the body of the caller's own review; the prior body is appended
/// to the edit history. Reviews by other authors, anonymous reviews, and
/// deleted reviews all answer 404.
async fn handle_update(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    id: &str,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let oid = match parse_review_id(id) {
        Ok(oid) => oid,
        Err(e) => return error_response(&e),
    };

    let payload: SubmitReviewRequest = match parse_json_body(req, state.args.max_body_bytes).await
    {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };

    let normalized = match validate_edit(&payload, &state.args.validation_policy()) {
        Ok(n) => n,
        Err(violations) => return error_response(&ConfiaError::Validation(violations)),
    };

    let store = match &state.store {
        Some(store) => store,
        None => return service_unavailable("Reviews are unavailable without storage"),
    };

    match store.update_review(&oid, &ctx.user_id, &normalized).await {
        Ok(Some(updated)) => {
            state
                .analytics
                .log_review(true, Some(&ctx.user_id), &updated.subject_id.to_hex())
                .await;
            json_response(StatusCode::OK, &ReviewResponse::from(&updated))
        }
        Ok(None) => not_found("Review not found"),
        Err(e) => error_response(&e),
    }
}

/// DELETE /api/v1/reviews/{id}
async fn handle_delete(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    id: &str,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let oid = match parse_review_id(id) {
        Ok(oid) => oid,
        Err(e) => return error_response(&e),
    };

    let store = match &state.store {
        Some(store) => store,
        None => return service_unavailable("Reviews are unavailable without storage"),
    };

    match store.delete_review(&oid, &ctx.user_id).await {
        Ok(true) => json_response(
            StatusCode::OK,
            &SuccessResponse {
                success: true,
                message: "Review deleted".to_string(),
            },
        ),
        Ok(false) => not_found("Review not found"),
        Err(e) => error_response(&e),
    }
}

/// An attributed review stores the author reference, so submitting one
/// without a session is an authentication failure, not a validation one.
fn requires_session(payload: &SubmitReviewRequest, authenticated: bool) -> bool {
    !payload.anonymous.unwrap_or(true) && !authenticated
}

fn parse_review_id(raw: &str) -> Result<ObjectId, ConfiaError> {
    ObjectId::parse_str(raw)
        .map_err(|_| ConfiaError::Validation(vec!["reviewId is not a valid id".to_string()]))
}

fn single_segment(rest: &str) -> Option<&str> {
    let segment = rest.strip_prefix('/')?;
    if segment.is_empty() || segment.contains('/') {
        None
    } else {
        Some(segment)
    }
}

/// Route /api/v1/reviews/* requests. Returns None for other paths.
pub async fn handle_review_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with(REVIEW_PREFIX) {
        return None;
    }

    if req.method() == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let subpath = path
        .split('?')
        .next()
        .unwrap_or(&path)
        .strip_prefix(REVIEW_PREFIX)
        .unwrap_or("")
        .to_string();
    let method = req.method().clone();

    let response = match (method, subpath.as_str()) {
        (Method::POST, "" | "/") => handle_submit(req, state).await,
        (Method::GET, "/mine") => handle_mine(req, state).await,
        (Method::PUT, rest) => match single_segment(rest) {
            Some(id) => handle_update(req, state, id).await,
            None => not_found("Review endpoint not found"),
        },
        (Method::DELETE, rest) => match single_segment(rest) {
            Some(id) => handle_delete(req, state, id).await,
            None => not_found("Review endpoint not found"),
        },
        (Method::GET, _) | (Method::POST, _) => not_found("Review endpoint not found"),
        _ => method_not_allowed(),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reviews::ValidationPolicy;
    use serde_json::json;

    #[test]
    fn test_attributed_submission_requires_session() {
        let payload: SubmitReviewRequest = serde_json::from_value(json!({
            "behavior": 5,
            "emotionalSafety": 4,
            "respect": 5,
            "character": 4,
            "confidence": 5,
            "anonymous": false,
            "narrative": "polite and on time",
            "subjectId": "64b2f0c8a1d2e3f4a5b6c7d8"
        }))
        .unwrap();

        // The payload itself is valid; the rejection is auth-class
        assert!(requires_session(&payload, false));
        assert!(!requires_session(&payload, true));
        assert!(validate(&payload, &ValidationPolicy::default()).is_ok());
    }

    #[test]
    fn test_anonymous_default_needs_no_session() {
        let payload = SubmitReviewRequest::default();
        assert!(!requires_session(&payload, false));
    }

    #[test]
    fn test_single_segment_extraction() {
        assert_eq!(single_segment("/abc"), Some("abc"));
        assert_eq!(single_segment("/"), None);
        assert_eq!(single_segment(""), None);
        assert_eq!(single_segment("/a/b"), None);
    }

    #[test]
    fn test_review_response_wire_shape() {
        let doc = ReviewDoc {
            _id: Some(ObjectId::new()),
            subject_id: ObjectId::new(),
            narrative: "fine".to_string(),
            anonymous: true,
            public: true,
            ..Default::default()
        };
        let json = serde_json::to_value(ReviewResponse::from(&doc)).unwrap();
        assert_eq!(json["subjectId"], doc.subject_id.to_hex());
        assert_eq!(json["editCount"], 0);
        assert!(json.get("city").is_none());
    }
}
