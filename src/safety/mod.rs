//! Safety features
//!
//! Emergency contact management, emergency alerts, and safe date sessions.
//! Alert dispatch is fire-and-forget per recipient so one slow provider
//! call never blocks the request that raised the alarm.

use bson::{doc, oid::ObjectId, DateTime};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::schemas::{
    AccountDoc, DateSessionDoc, ACCOUNT_COLLECTION, DATE_SESSION_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::services::SmsClient;
use crate::types::{ConfiaError, Result};

/// Most emergency contacts one account may hold
pub const MAX_EMERGENCY_CONTACTS: usize = 5;

/// Outcome of an alert dispatch
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    pub contacts_notified: usize,
}

/// Validate and normalize one phone number; `None` means rejected.
///
/// Accepts digits plus the usual punctuation, requires at least eight
/// digits. No carrier-level validation here, the SMS provider has the
/// final say.
fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 32 {
        return None;
    }

    let digits = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
    let charset_ok = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'));

    if digits >= 8 && charset_ok {
        Some(trimmed.to_string())
    } else {
        None
    }
}

fn compose_alert(user_id: &str, note: Option<&str>, location: Option<&str>) -> String {
    let mut message = format!("Confia+ emergency alert from user {}.", user_id);
    if let Some(location) = location {
        message.push_str(&format!(" Location: {}.", location));
    }
    if let Some(note) = note {
        message.push_str(&format!(" Message: {}.", note));
    }
    message.push_str(&format!(" Sent {}.", Utc::now().format("%Y-%m-%d %H:%M UTC")));
    message
}

/// Emergency contacts, alerts, and safe date sessions
pub struct SafetyService {
    accounts: MongoCollection<AccountDoc>,
    sessions: MongoCollection<DateSessionDoc>,
    sms: Arc<SmsClient>,
}

impl SafetyService {
    pub async fn new(client: &MongoClient, sms: Arc<SmsClient>) -> Result<Self> {
        Ok(Self {
            accounts: client.collection(ACCOUNT_COLLECTION).await?,
            sessions: client.collection(DATE_SESSION_COLLECTION).await?,
            sms,
        })
    }

    /// Replace the account's emergency contact list.
    pub async fn set_contacts(&self, user_id: &str, contacts: Vec<String>) -> Result<Vec<String>> {
        let mut violations = Vec::new();
        let mut normalized: Vec<String> = Vec::new();

        if contacts.len() > MAX_EMERGENCY_CONTACTS {
            violations.push(format!(
                "emergencyContacts must contain at most {} numbers",
                MAX_EMERGENCY_CONTACTS
            ));
        } else {
            for (index, raw) in contacts.iter().enumerate() {
                match normalize_phone(raw) {
                    Some(phone) => {
                        if !normalized.contains(&phone) {
                            normalized.push(phone);
                        }
                    }
                    None => violations.push(format!(
                        "emergencyContacts[{}] is not a valid phone number",
                        index
                    )),
                }
            }
        }

        if !violations.is_empty() {
            return Err(ConfiaError::Validation(violations));
        }

        let now = DateTime::now();
        let update = doc! {
            "$set": {
                "emergency_contacts": &normalized,
                "metadata.updated_at": now,
            },
            "$setOnInsert": {
                "plan": "free",
                "credit_balance": 0_i64,
                "free_queries_used": 0_i64,
                "metadata.is_deleted": false,
                "metadata.created_at": now,
            },
        };
        self.accounts
            .upsert_one(doc! { "user_id": user_id }, update)
            .await?;

        Ok(normalized)
    }

    /// Fire an emergency alert to every configured contact.
    ///
    /// Errors only when the account has no contacts; delivery itself is
    /// asynchronous and failures surface in the logs.
    pub async fn trigger_alert(
        &self,
        user_id: &str,
        note: Option<&str>,
        location: Option<&str>,
    ) -> Result<AlertStatus> {
        let contacts = match self.accounts.find_one(doc! { "user_id": user_id }).await? {
            Some(account) if !account.emergency_contacts.is_empty() => account.emergency_contacts,
            _ => {
                return Err(ConfiaError::Validation(vec![
                    "no emergency contacts configured".to_string(),
                ]))
            }
        };

        let message = compose_alert(user_id, note, location);
        Ok(self.dispatch(user_id, contacts, message))
    }

    fn dispatch(&self, user_id: &str, contacts: Vec<String>, message: String) -> AlertStatus {
        let contacts_notified = contacts.len();
        info!(
            user_id = %user_id,
            contacts = contacts_notified,
            "Dispatching emergency alert"
        );

        for contact in contacts {
            let sms = Arc::clone(&self.sms);
            let message = message.clone();
            tokio::spawn(async move {
                if let Err(e) = sms.send(&contact, &message).await {
                    warn!(error = %e, "Emergency SMS delivery failed");
                }
            });
        }

        AlertStatus { contacts_notified }
    }

    /// Open a safe date session and notify the stored contacts.
    ///
    /// Having no contacts does not block opening; the notification is simply
    /// skipped.
    pub async fn open_session(
        &self,
        user_id: &str,
        subject_name: Option<String>,
        location: Option<String>,
    ) -> Result<DateSessionDoc> {
        let mut session = DateSessionDoc::new(user_id, subject_name, location);
        let id = self.sessions.insert_one(session.clone()).await?;
        session._id = Some(id);
        info!(user_id = %user_id, session_id = %id, "Safe date session opened");

        let contacts = self
            .accounts
            .find_one(doc! { "user_id": user_id })
            .await?
            .map(|account| account.emergency_contacts)
            .unwrap_or_default();

        if !contacts.is_empty() {
            let note = match &session.subject_name {
                Some(name) => format!("Started a safe date session (meeting {})", name),
                None => "Started a safe date session".to_string(),
            };
            let message = compose_alert(user_id, Some(&note), session.location.as_deref());
            self.dispatch(user_id, contacts, message);
        }

        Ok(session)
    }

    /// Close an active session with an "I'm safe" check-in.
    ///
    /// Returns `None` when the session does not exist, belongs to another
    /// user, or is no longer active.
    pub async fn check_in(&self, user_id: &str, session_id: &str) -> Result<Option<DateSessionDoc>> {
        let id = parse_session_id(session_id)?;
        let now = DateTime::now();

        self.sessions
            .find_one_and_update(
                doc! { "_id": id, "user_id": user_id, "status": "active" },
                doc! {
                    "$set": {
                        "status": "checked_in",
                        "closed_at": now,
                        "metadata.updated_at": now,
                    }
                },
            )
            .await
    }

    /// Escalate an active session: mark it SOS and alert the contacts.
    ///
    /// The session transitions even when no contacts are configured; the
    /// response carries how many were actually notified.
    pub async fn trigger_sos(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<(DateSessionDoc, AlertStatus)>> {
        let id = parse_session_id(session_id)?;
        let now = DateTime::now();

        let session = match self
            .sessions
            .find_one_and_update(
                doc! { "_id": id, "user_id": user_id, "status": "active" },
                doc! {
                    "$set": {
                        "status": "sos",
                        "closed_at": now,
                        "metadata.updated_at": now,
                    }
                },
            )
            .await?
        {
            Some(session) => session,
            None => return Ok(None),
        };

        let contacts = self
            .accounts
            .find_one(doc! { "user_id": user_id })
            .await?
            .map(|account| account.emergency_contacts)
            .unwrap_or_default();

        let status = if contacts.is_empty() {
            warn!(user_id = %user_id, "SOS raised with no emergency contacts configured");
            AlertStatus {
                contacts_notified: 0,
            }
        } else {
            let message = compose_alert(
                user_id,
                Some("SOS raised during a safe date session"),
                session.location.as_deref(),
            );
            self.dispatch(user_id, contacts, message)
        };

        Ok(Some((session, status)))
    }

    /// Sessions belonging to a user, most recent first.
    pub async fn sessions_for(&self, user_id: &str) -> Result<Vec<DateSessionDoc>> {
        let mut sessions = self.sessions.find_many(doc! { "user_id": user_id }).await?;
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }
}

fn parse_session_id(raw: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw)
        .map_err(|_| ConfiaError::Validation(vec!["sessionId is not a valid id".to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_normalization() {
        assert_eq!(
            normalize_phone("  +55 (11) 99999-0000  "),
            Some("+55 (11) 99999-0000".to_string())
        );
        assert_eq!(normalize_phone("11999990000"), Some("11999990000".to_string()));
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("call me maybe"), None);
        assert_eq!(normalize_phone("123"), None);
    }

    #[test]
    fn test_alert_message_includes_context() {
        let message = compose_alert("u1", Some("please call"), Some("Av. Paulista 1000"));
        assert!(message.contains("u1"));
        assert!(message.contains("Av. Paulista 1000"));
        assert!(message.contains("please call"));
    }

    #[test]
    fn test_alert_message_without_optionals() {
        let message = compose_alert("u1", None, None);
        assert!(message.contains("emergency alert"));
        assert!(!message.contains("Location"));
    }

    #[test]
    fn test_session_id_parsing() {
        assert!(parse_session_id("not-an-oid").is_err());
        assert!(parse_session_id("65f0a1b2c3d4e5f6a7b8c9d0").is_ok());
    }
}
