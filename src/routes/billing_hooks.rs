//! Billing webhook endpoint
//!
//! POST /webhooks/billing receives payment provider deliveries. The provider
//! retries on any non-2xx, so the handler answers 200 for every processed
//! outcome including duplicates and ignored event types, and lets storage
//! failures surface as 503 to request a retry.

use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::billing::{BillingEvent, WebhookOutcome};
use crate::routes::{error_response, json_response, parse_json_body, service_unavailable, BoxBody};
use crate::server::AppState;
use crate::types::ConfiaError;

#[derive(Debug, Serialize)]
struct WebhookResponse {
    success: bool,
    outcome: WebhookOutcome,
    duplicate: bool,
}

/// POST /webhooks/billing
pub async fn handle_billing_webhook(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    if let Some(secret) = &state.args.webhook_secret {
        let provided = req
            .headers()
            .get("x-webhook-secret")
            .and_then(|value| value.to_str().ok());
        if provided != Some(secret.as_str()) {
            warn!("Rejected billing webhook with missing or wrong secret");
            return error_response(&ConfiaError::Auth("Invalid webhook secret".into()));
        }
    }

    let event: BillingEvent = match parse_json_body(req, state.args.max_body_bytes).await {
        Ok(event) => event,
        Err(e) => return error_response(&e),
    };

    let billing = match &state.billing {
        Some(billing) => billing,
        None => return service_unavailable("Billing is unavailable without storage"),
    };

    match billing.process(&event).await {
        Ok(outcome) => {
            let label = match outcome {
                WebhookOutcome::Applied => "applied",
                WebhookOutcome::Duplicate => "duplicate",
                WebhookOutcome::Ignored => "ignored",
            };
            state
                .analytics
                .log_billing(&event.user_id, &event.event_type, label)
                .await;
            json_response(
                StatusCode::OK,
                &WebhookResponse {
                    success: true,
                    outcome,
                    duplicate: outcome == WebhookOutcome::Duplicate,
                },
            )
        }
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_response_wire_shape() {
        let value = serde_json::to_value(WebhookResponse {
            success: true,
            outcome: WebhookOutcome::Duplicate,
            duplicate: true,
        })
        .unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["outcome"], "DUPLICATE");
        assert_eq!(value["duplicate"], true);
    }
}
