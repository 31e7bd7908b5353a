//! HTTP routes for emergency alerts and safe date mode
//!
//! - PUT  /api/v1/safety/contacts           - Replace emergency contacts
//! - POST /api/v1/safety/alert              - Alert every contact now
//! - POST /api/v1/safety/date               - Open a safe date session
//! - GET  /api/v1/safety/date               - List the caller's sessions
//! - POST /api/v1/safety/date/{id}/checkin  - Close a session safe
//! - POST /api/v1/safety/date/{id}/sos      - Escalate a session
//!
//! Everything here requires a session. Safety state belongs to the caller
//! alone; acting on another user's session reads as a plain 404.

use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::authenticate;
use crate::db::schemas::{DateSessionDoc, DateSessionStatus};
use crate::routes::{
    cors_preflight, error_response, json_response, method_not_allowed, not_found,
    parse_json_body, parse_json_body_or_default, service_unavailable, BoxBody,
};
use crate::server::AppState;

const SAFETY_PREFIX: &str = "/api/v1/safety";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactsRequest {
    #[serde(default, alias = "emergency_contacts")]
    emergency_contacts: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactsResponse {
    emergency_contacts: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AlertRequest {
    message: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertResponse {
    success: bool,
    contacts_notified: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenSessionRequest {
    #[serde(alias = "subject_name")]
    subject_name: Option<String>,
    location: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateSessionResponse {
    pub id: String,
    pub status: DateSessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
}

impl From<&DateSessionDoc> for DateSessionResponse {
    fn from(doc: &DateSessionDoc) -> Self {
        Self {
            id: doc._id.map(|id| id.to_hex()).unwrap_or_default(),
            status: doc.status.clone(),
            subject_name: doc.subject_name.clone(),
            location: doc.location.clone(),
            started_at: doc.started_at.to_chrono().to_rfc3339(),
            closed_at: doc.closed_at.map(|d| d.to_chrono().to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionsResponse {
    sessions: Vec<DateSessionResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SosResponse {
    session: DateSessionResponse,
    contacts_notified: usize,
}

/// PUT /api/v1/safety/contacts
async fn handle_contacts(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let payload: ContactsRequest = match parse_json_body(req, state.args.max_body_bytes).await {
        Ok(payload) => payload,
        Err(e) => return error_response(&e),
    };

    let safety = match &state.safety {
        Some(safety) => safety,
        None => return service_unavailable("Safety features are unavailable without storage"),
    };

    match safety.set_contacts(&ctx.user_id, payload.emergency_contacts).await {
        Ok(contacts) => json_response(
            StatusCode::OK,
            &ContactsResponse {
                emergency_contacts: contacts,
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/safety/alert
///
/// The body is optional: the panic button must work with nothing but a
/// token.
async fn handle_alert(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let payload: AlertRequest =
        match parse_json_body_or_default(req, state.args.max_body_bytes).await {
            Ok(payload) => payload,
            Err(e) => return error_response(&e),
        };

    let safety = match &state.safety {
        Some(safety) => safety,
        None => return service_unavailable("Safety features are unavailable without storage"),
    };

    match safety
        .trigger_alert(&ctx.user_id, payload.message.as_deref(), payload.location.as_deref())
        .await
    {
        Ok(status) => {
            state
                .analytics
                .log_alert(&ctx.user_id, status.contacts_notified)
                .await;
            json_response(
                StatusCode::OK,
                &AlertResponse {
                    success: true,
                    contacts_notified: status.contacts_notified,
                },
            )
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/safety/date
async fn handle_open_date(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let payload: OpenSessionRequest =
        match parse_json_body_or_default(req, state.args.max_body_bytes).await {
            Ok(payload) => payload,
            Err(e) => return error_response(&e),
        };

    let safety = match &state.safety {
        Some(safety) => safety,
        None => return service_unavailable("Safety features are unavailable without storage"),
    };

    match safety
        .open_session(&ctx.user_id, payload.subject_name, payload.location)
        .await
    {
        Ok(session) => {
            state.analytics.log_date_session(&ctx.user_id, "opened").await;
            json_response(StatusCode::CREATED, &DateSessionResponse::from(&session))
        }
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/safety/date
async fn handle_list_dates(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let safety = match &state.safety {
        Some(safety) => safety,
        None => return service_unavailable("Safety features are unavailable without storage"),
    };

    match safety.sessions_for(&ctx.user_id).await {
        Ok(sessions) => json_response(
            StatusCode::OK,
            &SessionsResponse {
                sessions: sessions.iter().map(DateSessionResponse::from).collect(),
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/safety/date/{id}/checkin
async fn handle_checkin(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    session_id: &str,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let safety = match &state.safety {
        Some(safety) => safety,
        None => return service_unavailable("Safety features are unavailable without storage"),
    };

    match safety.check_in(&ctx.user_id, session_id).await {
        Ok(Some(session)) => {
            state
                .analytics
                .log_date_session(&ctx.user_id, "checked_in")
                .await;
            json_response(StatusCode::OK, &DateSessionResponse::from(&session))
        }
        Ok(None) => not_found("Date session not found"),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/safety/date/{id}/sos
async fn handle_sos(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    session_id: &str,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state.jwt) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let safety = match &state.safety {
        Some(safety) => safety,
        None => return service_unavailable("Safety features are unavailable without storage"),
    };

    match safety.trigger_sos(&ctx.user_id, session_id).await {
        Ok(Some((session, status))) => {
            state.analytics.log_date_session(&ctx.user_id, "sos").await;
            state
                .analytics
                .log_alert(&ctx.user_id, status.contacts_notified)
                .await;
            json_response(
                StatusCode::OK,
                &SosResponse {
                    session: DateSessionResponse::from(&session),
                    contacts_notified: status.contacts_notified,
                },
            )
        }
        Ok(None) => not_found("Date session not found"),
        Err(e) => error_response(&e),
    }
}

/// Split "/date/{id}/{action}" into its id and action
fn session_action(rest: &str) -> Option<(&str, &str)> {
    let rest = rest.strip_prefix("/date/")?;
    let (id, action) = rest.rsplit_once('/')?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some((id, action))
}

/// Route /api/v1/safety/* requests. Returns None for other paths.
pub async fn handle_safety_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    if !path.starts_with(SAFETY_PREFIX) {
        return None;
    }

    if req.method() == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let subpath = path
        .split('?')
        .next()
        .unwrap_or(&path)
        .strip_prefix(SAFETY_PREFIX)
        .unwrap_or("")
        .to_string();
    let method = req.method().clone();

    let response = match (method, subpath.as_str()) {
        (Method::PUT, "/contacts") => handle_contacts(req, state).await,
        (Method::POST, "/alert") => handle_alert(req, state).await,
        (Method::POST, "/date") => handle_open_date(req, state).await,
        (Method::GET, "/date") => handle_list_dates(req, state).await,
        (Method::POST, rest) => match session_action(rest) {
            Some((id, "checkin")) => handle_checkin(req, state, id).await,
            Some((id, "sos")) => handle_sos(req, state, id).await,
            _ => not_found("Safety endpoint not found"),
        },
        (Method::GET, _) | (Method::PUT, _) => not_found("Safety endpoint not found"),
        _ => method_not_allowed(),
    };

    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_action_parsing() {
        assert_eq!(
            session_action("/date/68a1b2c3/checkin"),
            Some(("68a1b2c3", "checkin"))
        );
        assert_eq!(session_action("/date/68a1b2c3/sos"), Some(("68a1b2c3", "sos")));
        assert_eq!(session_action("/date/68a1b2c3"), None);
        assert_eq!(session_action("/date//checkin"), None);
        assert_eq!(session_action("/alert"), None);
    }

    #[test]
    fn test_contacts_request_accepts_both_key_styles() {
        let camel: ContactsRequest =
            serde_json::from_str(r#"{"emergencyContacts":["+55 11 91234-5678"]}"#).unwrap();
        assert_eq!(camel.emergency_contacts.len(), 1);

        let snake: ContactsRequest =
            serde_json::from_str(r#"{"emergency_contacts":[]}"#).unwrap();
        assert!(snake.emergency_contacts.is_empty());
    }

    #[test]
    fn test_session_response_wire_shape() {
        let mut doc = DateSessionDoc::new("user-1", Some("Carlos".to_string()), None);
        doc.status = DateSessionStatus::CheckedIn;

        let value = serde_json::to_value(DateSessionResponse::from(&doc)).unwrap();
        assert_eq!(value["status"], "checked_in");
        assert_eq!(value["subjectName"], "Carlos");
        assert!(value.get("location").is_none());
        assert!(value.get("closedAt").is_none());
    }
}
