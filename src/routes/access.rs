//! HTTP routes for entitlement status and explicit consumption
//!
//! - GET  /api/v1/access          - Current access decision, no consumption
//! - POST /api/v1/access/consume  - Spend one free query, credit, or feature action
//!
//! Consumption always answers 200: `consumed: false` with a reason is the
//! product telling the client to upsell, not a failed request.

use chrono::Utc;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::authenticate;
use crate::entitlements::{decide_access, ConsumeKind};
use crate::routes::{
    cors_preflight, error_response, json_response, method_not_allowed, not_found,
    parse_json_body, BoxBody,
};
use crate::server::AppState;

const ACCESS_PREFIX: &str = "/api/v1/access";

#[derive(Debug, Deserialize)]
struct ConsumeRequest {
    kind: ConsumeKind,
}

/// GET /api/v1/access
async fn handle_status(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let account = match state.ledger.account(&ctx.user_id).await {
        Ok(account) => account,
        Err(e) => return error_response(&e),
    };

    let decision = decide_access(&account, Utc::now(), state.ledger.free_query_limit());
    json_response(StatusCode::OK, &decision)
}

/// POST /api/v1/access/consume
async fn handle_consume(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let payload: ConsumeRequest = match parse_json_body(req, state.args.max_body_bytes).await {
        Ok(payload) => payload,
        Err(e) => return error_response(&e),
    };

    let result = match state.ledger.try_consume(&ctx.user_id, payload.kind).await {
        Ok(result) => result,
        Err(e) => return error_response(&e),
    };

    let operation = match payload.kind {
        ConsumeKind::FreeQuery => "free_query",
        ConsumeKind::Credit => "credit",
        ConsumeKind::FeatureAction => "feature_action",
    };
    state
        .analytics
        .log_access(&ctx.user_id, operation, result.consumed)
        .await;

    json_response(StatusCode::OK, &result)
}

/// Route /api/v1/access/* requests. Returns None for other paths.
pub async fn handle_access_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with(ACCESS_PREFIX) {
        return None;
    }

    if req.method() == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let subpath = path
        .split('?')
        .next()
        .unwrap_or(&path)
        .strip_prefix(ACCESS_PREFIX)
        .unwrap_or("")
        .to_string();
    let method = req.method().clone();

    let response = match (method, subpath.as_str()) {
        (Method::GET, "" | "/") => handle_status(req, state).await,
        (Method::POST, "/consume") => handle_consume(req, state).await,
        (Method::GET, _) | (Method::POST, _) => not_found("Access endpoint not found"),
        _ => method_not_allowed(),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_request_wire_format() {
        let parsed: ConsumeRequest = serde_json::from_str(r#"{"kind":"CREDIT"}"#).unwrap();
        assert_eq!(parsed.kind, ConsumeKind::Credit);

        let parsed: ConsumeRequest = serde_json::from_str(r#"{"kind":"FREE_QUERY"}"#).unwrap();
        assert_eq!(parsed.kind, ConsumeKind::FreeQuery);

        assert!(serde_json::from_str::<ConsumeRequest>(r#"{"kind":"credits"}"#).is_err());
    }
}
