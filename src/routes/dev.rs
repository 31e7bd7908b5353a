//! Dev-mode token endpoint
//!
//! POST /dev/token mints a signed session token without the auth provider,
//! so local clients and integration tests can exercise authenticated
//! routes. Outside dev mode the path answers 404 and gives nothing away.

use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::routes::{error_response, json_response, not_found, parse_json_body, BoxBody};
use crate::server::AppState;
use crate::types::ConfiaError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevTokenRequest {
    #[serde(alias = "user_id")]
    user_id: String,
    email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DevTokenResponse {
    token: String,
    user_id: String,
    expires_in_seconds: u64,
}

/// POST /dev/token
pub async fn handle_dev_token(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    if !state.args.dev_mode {
        return not_found("Not found");
    }

    let payload: DevTokenRequest = match parse_json_body(req, state.args.max_body_bytes).await {
        Ok(payload) => payload,
        Err(e) => return error_response(&e),
    };

    let user_id = payload.user_id.trim();
    if user_id.is_empty() {
        return error_response(&ConfiaError::Validation(vec![
            "userId is required".to_string(),
        ]));
    }

    match state.jwt.issue(user_id, payload.email.as_deref()) {
        Ok(token) => json_response(
            StatusCode::OK,
            &DevTokenResponse {
                token,
                user_id: user_id.to_string(),
                expires_in_seconds: state.args.jwt_expiry_seconds,
            },
        ),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_both_key_styles() {
        let camel: DevTokenRequest =
            serde_json::from_str(r#"{"userId":"maria","email":"m@example.com"}"#).unwrap();
        assert_eq!(camel.user_id, "maria");
        assert_eq!(camel.email.as_deref(), Some("m@example.com"));

        let snake: DevTokenRequest = serde_json::from_str(r#"{"user_id":"ana"}"#).unwrap();
        assert_eq!(snake.user_id, "ana");
        assert_eq!(snake.email, None);
    }
}
