//! HTTP routes for subject search and gated reputation lookups
//!
//! - GET /api/v1/subjects?name=&city=       - Ungated substring search
//! - GET /api/v1/subjects/{id}/reputation   - Gated aggregate
//!
//! Search is the free tease; the aggregate is the paid product. An active
//! plan reads unmetered, otherwise one free query or one credit is consumed
//! atomically before the aggregate is computed.

use bson::oid::ObjectId;
use chrono::Utc;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::authenticate;
use crate::db::schemas::SubjectDoc;
use crate::entitlements::{resolve, ConsumeKind, Plan};
use crate::reviews::{aggregate, ViewerContext};
use crate::routes::{
    cors_preflight, error_response, json_response, method_not_allowed, not_found,
    paywall_response, service_unavailable, BoxBody,
};
use crate::server::AppState;
use crate::types::ConfiaError;

const SUBJECT_PREFIX: &str = "/api/v1/subjects";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResponse {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub review_count: i64,
}

impl From<&SubjectDoc> for SubjectResponse {
    fn from(doc: &SubjectDoc) -> Self {
        Self {
            id: doc._id.map(|id| id.to_hex()).unwrap_or_default(),
            display_name: doc.display_name.clone(),
            city: doc.city.clone(),
            review_count: doc.review_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub subjects: Vec<SubjectResponse>,
}

#[derive(Debug, Default)]
struct SearchParams {
    name: Option<String>,
    city: Option<String>,
}

fn parse_search_params(query: Option<&str>) -> SearchParams {
    let mut params = SearchParams::default();

    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let value = urlencoding::decode(value).unwrap_or_default();
                match key {
                    "name" => params.name = Some(value.to_string()),
                    "city" => params.city = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }

    params
}

/// GET /api/v1/subjects?name=&city=
///
/// Case-insensitive substring match on the normalized name, optionally
/// narrowed to a city. No session and no consumption: search exists so
/// users can find out whether a lookup is worth paying for.
async fn handle_search(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let params = parse_search_params(req.uri().query());

    let name = match params.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => {
            return error_response(&ConfiaError::Validation(vec![
                "name query parameter is required".to_string(),
            ]))
        }
    };

    let store = match &state.store {
        Some(store) => store,
        None => return service_unavailable("Subject search is unavailable without storage"),
    };

    let city = params.city.as_deref().map(str::trim).filter(|c| !c.is_empty());
    match store.search_subjects(&name, city).await {
        Ok(subjects) => json_response(
            StatusCode::OK,
            &SearchResponse {
                subjects: subjects.iter().map(SubjectResponse::from).collect(),
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/subjects/{id}/reputation
///
/// Flow:
/// 1. Authenticate (the meter needs an account)
/// 2. Resolve the subject (404 before any consumption)
/// 3. Active plan reads unmetered; otherwise consume one free query, then
///    one credit; both exhausted is a 402 paywall notice
/// 4. Aggregate with the viewer's visibility capability
async fn handle_reputation(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    id: &str,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let oid = match ObjectId::parse_str(id) {
        Ok(oid) => oid,
        Err(_) => {
            return error_response(&ConfiaError::Validation(vec![
                "subjectId is not a valid id".to_string(),
            ]))
        }
    };

    let store = match &state.store {
        Some(store) => store,
        None => return service_unavailable("Reputation lookups are unavailable without storage"),
    };

    let subject = match store.subject_by_id(&oid).await {
        Ok(Some(subject)) => subject,
        Ok(None) => return not_found("Subject not found"),
        Err(e) => return error_response(&e),
    };

    let account = match state.ledger.account(&ctx.user_id).await {
        Ok(account) => account,
        Err(e) => return error_response(&e),
    };
    let entitlement = resolve(&account, Utc::now());

    if !entitlement.effective_plan_active {
        let free = match state.ledger.try_consume(&ctx.user_id, ConsumeKind::FreeQuery).await {
            Ok(result) => result,
            Err(e) => return error_response(&e),
        };

        if free.consumed {
            state.analytics.log_access(&ctx.user_id, "free_query", true).await;
        } else {
            let credit = match state.ledger.try_consume(&ctx.user_id, ConsumeKind::Credit).await {
                Ok(result) => result,
                Err(e) => return error_response(&e),
            };

            if credit.consumed {
                state.analytics.log_access(&ctx.user_id, "credit", true).await;
            } else {
                state
                    .analytics
                    .log_access(&ctx.user_id, "reputation_query", false)
                    .await;
                // Free accounts hear about the allowance; lapsed paid
                // accounts hear about the plan
                let code = if Plan::parse(&account.plan) == Plan::Free {
                    "FREE_LIMIT_REACHED"
                } else {
                    "PAYWALL"
                };
                return paywall_response(
                    "Free queries exhausted; buy credits or subscribe to continue",
                    code,
                    entitlement.plan.as_str(),
                    entitlement.credits,
                );
            }
        }
    }

    let reviews = match store.reviews_for_subject(&oid).await {
        Ok(reviews) => reviews,
        Err(e) => return error_response(&e),
    };

    let viewer = ViewerContext {
        user_id: Some(ctx.user_id.clone()),
        can_view_full_result: entitlement.can_view_full_result,
    };
    let result = aggregate(&oid.to_hex(), &reviews, &viewer);

    state
        .analytics
        .log_reputation_query(&ctx.user_id, &oid.to_hex(), entitlement.can_view_full_result)
        .await;

    json_response(StatusCode::OK, &result)
}

/// Split "/{id}/reputation" into its subject id
fn reputation_segment(rest: &str) -> Option<&str> {
    let segment = rest.strip_prefix('/')?;
    let id = segment.strip_suffix("/reputation")?;
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(id)
    }
}

/// Route /api/v1/subjects/* requests. Returns None for other paths.
pub async fn handle_subject_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with(SUBJECT_PREFIX) {
        return None;
    }

    if req.method() == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let subpath = path
        .split('?')
        .next()
        .unwrap_or(&path)
        .strip_prefix(SUBJECT_PREFIX)
        .unwrap_or("")
        .to_string();
    let method = req.method().clone();

    let response = match (method, subpath.as_str()) {
        (Method::GET, "" | "/") => handle_search(req, state).await,
        (Method::GET, rest) => match reputation_segment(rest) {
            Some(id) => handle_reputation(req, state, id).await,
            None => not_found("Subject endpoint not found"),
        },
        _ => method_not_allowed(),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_params() {
        let params = parse_search_params(Some("name=Carlos%20Mendes&city=S%C3%A3o%20Paulo"));
        assert_eq!(params.name.as_deref(), Some("Carlos Mendes"));
        assert_eq!(params.city.as_deref(), Some("São Paulo"));

        let empty = parse_search_params(None);
        assert_eq!(empty.name, None);
    }

    #[test]
    fn test_unknown_params_ignored() {
        let params = parse_search_params(Some("name=Ana&page=2"));
        assert_eq!(params.name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_reputation_segment() {
        assert_eq!(reputation_segment("/abc/reputation"), Some("abc"));
        assert_eq!(reputation_segment("/abc"), None);
        assert_eq!(reputation_segment("/reputation"), None);
        assert_eq!(reputation_segment("/a/b/reputation"), None);
    }
}
