//! HTTP routes for Confia
//!
//! Every handler speaks JSON over the same response helpers defined here.
//! Paywall outcomes are ordinary payloads with their own codes; the
//! [`ErrorResponse`] shape is reserved for genuine failures.

pub mod access;
pub mod billing_hooks;
pub mod dev;
pub mod health;
pub mod reviews;
pub mod safety_routes;
pub mod subjects;

pub use access::handle_access_request;
pub use billing_hooks::handle_billing_webhook;
pub use dev::handle_dev_token;
pub use health::{health_check, readiness_check, version_info};
pub use reviews::handle_review_request;
pub use safety_routes::handle_safety_request;
pub use subjects::handle_subject_request;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::types::ConfiaError;

pub(crate) type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Standard JSON error payload
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Individual violations, present only for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            errors: None,
        }
    }

    pub fn with_code(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            errors: None,
        }
    }
}

/// Paid-feature denial payload, served with HTTP 402. A product outcome,
/// not an error: the client renders an upsell, not a failure state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaywallNotice {
    pub error: String,
    pub code: String,
    pub plan: String,
    pub credits: i64,
}

pub(crate) fn paywall_response(message: &str, code: &str, plan: &str, credits: i64) -> Response<BoxBody> {
    json_response(
        StatusCode::PAYMENT_REQUIRED,
        &PaywallNotice {
            error: message.to_string(),
            code: code.to_string(),
            plan: plan.to_string(),
            credits,
        },
    )
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

/// Map a domain error onto the wire shape
pub(crate) fn error_response(err: &ConfiaError) -> Response<BoxBody> {
    let body = match err {
        ConfiaError::Validation(violations) => ErrorResponse {
            error: "Validation failed".to_string(),
            code: Some(err.code().to_string()),
            errors: Some(violations.clone()),
        },
        _ => ErrorResponse::with_code(err.to_string(), err.code()),
    };
    json_response(err.status(), &body)
}

pub(crate) fn not_found(message: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse::with_code(message, "NOT_FOUND"),
    )
}

pub(crate) fn method_not_allowed() -> Response<BoxBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorResponse::new("Method not allowed"),
    )
}

pub(crate) fn service_unavailable(message: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::SERVICE_UNAVAILABLE,
        &ErrorResponse::with_code(message, "STORE_UNAVAILABLE"),
    )
}

pub(crate) fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub(crate) fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

async fn body_bytes(
    req: Request<hyper::body::Incoming>,
    max_bytes: usize,
) -> Result<Bytes, ConfiaError> {
    let body = req
        .collect()
        .await
        .map_err(|e| ConfiaError::Http(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > max_bytes {
        return Err(ConfiaError::Http("Request body too large".into()));
    }
    Ok(bytes)
}

/// Read and deserialize a JSON request body, bounded by the configured size
pub(crate) async fn parse_json_body<T: for<'de> Deserialize<'de>>(
    req: Request<hyper::body::Incoming>,
    max_bytes: usize,
) -> Result<T, ConfiaError> {
    let bytes = body_bytes(req, max_bytes).await?;
    serde_json::from_slice(&bytes).map_err(|e| ConfiaError::Http(format!("Invalid JSON: {}", e)))
}

/// Like [`parse_json_body`], but an absent or empty body deserializes as the
/// default. For endpoints whose fields are all optional.
pub(crate) async fn parse_json_body_or_default<T: for<'de> Deserialize<'de> + Default>(
    req: Request<hyper::body::Incoming>,
    max_bytes: usize,
) -> Result<T, ConfiaError> {
    let bytes = body_bytes(req, max_bytes).await?;
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ConfiaError::Http(format!("Invalid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shapes() {
        let plain = serde_json::to_value(&ErrorResponse::with_code("nope", "UNAUTHENTICATED"))
            .unwrap();
        assert_eq!(plain["error"], "nope");
        assert_eq!(plain["code"], "UNAUTHENTICATED");
        assert!(plain.get("errors").is_none());
    }

    #[test]
    fn test_validation_error_carries_violation_list() {
        let err = ConfiaError::Validation(vec!["a".into(), "b".into()]);
        let response = error_response(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
