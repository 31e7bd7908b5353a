//! Billing webhook processing
//!
//! Applies plan and credit changes reported by the external billing
//! provider. Deliveries are at-least-once, so every event is recorded under
//! its provider event id before the account changes; a unique index on that
//! id turns replays into acknowledged no-ops.

use bson::{doc, DateTime, Document};
use chrono::{DateTime as ChronoDateTime, Utc};
use mongodb::options::UpdateOptions;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::db::mongo::is_duplicate_key_error;
use crate::db::schemas::{
    AccountDoc, BillingEventDoc, ACCOUNT_COLLECTION, BILLING_EVENT_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::entitlements::Plan;
use crate::types::{ConfiaError, Result};

const SUBSCRIPTION_ACTIVATED: &str = "subscription.activated";
const SUBSCRIPTION_CANCELED: &str = "subscription.canceled";
const PAYMENT_COMPLETED: &str = "payment.completed";

/// Incoming webhook payload from the billing provider
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingEvent {
    #[serde(alias = "id")]
    pub event_id: String,

    #[serde(alias = "type")]
    pub event_type: String,

    pub user_id: String,

    #[serde(default)]
    pub plan: Option<String>,

    #[serde(default)]
    pub credits: Option<i64>,

    #[serde(default)]
    pub expires_at: Option<ChronoDateTime<Utc>>,
}

/// How a webhook delivery was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    Ignored,
}

/// Build the account update for a billing event.
///
/// Returns `Ok(None)` for event types this service does not act on; those
/// are acknowledged without being recorded. Malformed events of a known
/// type are validation errors so the provider surfaces them instead of
/// retrying forever.
fn account_update(event: &BillingEvent) -> Result<Option<Document>> {
    let mut violations = Vec::new();
    if event.event_id.trim().is_empty() {
        violations.push("eventId must not be empty".to_string());
    }
    if event.user_id.trim().is_empty() {
        violations.push("userId must not be empty".to_string());
    }
    if !violations.is_empty() {
        return Err(ConfiaError::Validation(violations));
    }

    let now = DateTime::now();
    let base_on_insert = |update: &mut Document, with_plan: bool, with_credits: bool| {
        let mut on_insert = doc! {
            "emergency_contacts": [],
            "metadata.is_deleted": false,
            "metadata.created_at": now,
        };
        if with_plan {
            on_insert.insert("plan", "free");
        }
        if with_credits {
            on_insert.insert("credit_balance", 0_i64);
        }
        on_insert.insert("free_queries_used", 0_i64);
        update.insert("$setOnInsert", on_insert);
    };

    match event.event_type.as_str() {
        SUBSCRIPTION_ACTIVATED => {
            let plan = match event.plan.as_deref().map(Plan::parse) {
                Some(plan) if plan != Plan::Free => plan,
                _ => {
                    return Err(ConfiaError::Validation(vec![
                        "plan must be one of premium_monthly, premium_yearly, premium_plus"
                            .to_string(),
                    ]))
                }
            };

            let mut set = doc! { "plan": plan.as_str(), "metadata.updated_at": now };
            let mut update = Document::new();
            match event.expires_at {
                Some(expires) => {
                    set.insert("plan_expires_at", DateTime::from_chrono(expires));
                }
                None => {
                    update.insert("$unset", doc! { "plan_expires_at": "" });
                }
            }
            update.insert("$set", set);
            base_on_insert(&mut update, false, true);
            Ok(Some(update))
        }
        SUBSCRIPTION_CANCELED => {
            let mut update = doc! {
                "$set": { "plan": "free", "metadata.updated_at": now },
                "$unset": { "plan_expires_at": "" },
            };
            base_on_insert(&mut update, false, true);
            Ok(Some(update))
        }
        PAYMENT_COMPLETED => {
            let credits = match event.credits {
                Some(credits) if credits > 0 => credits,
                _ => {
                    return Err(ConfiaError::Validation(vec![
                        "credits must be a positive integer".to_string(),
                    ]))
                }
            };

            let mut update = doc! {
                "$inc": { "credit_balance": credits },
                "$set": { "metadata.updated_at": now },
            };
            base_on_insert(&mut update, true, false);
            Ok(Some(update))
        }
        _ => Ok(None),
    }
}

/// Records and applies billing events against the account store
pub struct BillingProcessor {
    accounts: MongoCollection<AccountDoc>,
    events: MongoCollection<BillingEventDoc>,
}

impl BillingProcessor {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            accounts: client.collection(ACCOUNT_COLLECTION).await?,
            events: client.collection(BILLING_EVENT_COLLECTION).await?,
        })
    }

    /// Process one webhook delivery.
    pub async fn process(&self, event: &BillingEvent) -> Result<WebhookOutcome> {
        let update = match account_update(event)? {
            Some(update) => update,
            None => {
                info!(
                    event_type = %event.event_type,
                    "Ignoring unrecognized billing event type"
                );
                return Ok(WebhookOutcome::Ignored);
            }
        };

        // Record first. A replayed event id fails the unique index and is
        // acknowledged without touching the account again.
        let record = BillingEventDoc::new(&event.event_id, &event.event_type, &event.user_id);
        match self.events.inner().insert_one(record).await {
            Ok(_) => {}
            Err(e) if is_duplicate_key_error(&e) => {
                info!(event_id = %event.event_id, "Duplicate billing event, already applied");
                return Ok(WebhookOutcome::Duplicate);
            }
            Err(e) => {
                return Err(ConfiaError::Store(format!(
                    "Billing event insert failed: {}",
                    e
                )))
            }
        }

        if let Err(e) = self.apply(&event.user_id, update).await {
            // Release the event id so the provider's retry can apply it.
            if let Err(cleanup) = self
                .events
                .inner()
                .delete_one(doc! { "event_id": &event.event_id })
                .await
            {
                error!(
                    event_id = %event.event_id,
                    error = %cleanup,
                    "Failed to release billing event after apply failure"
                );
            }
            return Err(e);
        }

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            user_id = %event.user_id,
            "Applied billing event"
        );
        Ok(WebhookOutcome::Applied)
    }

    async fn apply(&self, user_id: &str, update: Document) -> Result<()> {
        let filter = doc! { "user_id": user_id };
        let options = UpdateOptions::builder().upsert(true).build();

        let result = self
            .accounts
            .inner()
            .update_one(filter.clone(), update.clone())
            .with_options(options)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => {
                // Lost an upsert race; the row exists now, plain update applies.
                self.accounts
                    .inner()
                    .update_one(filter, update)
                    .await
                    .map(|_| ())
                    .map_err(|e| ConfiaError::Store(format!("Account update failed: {}", e)))
            }
            Err(e) => Err(ConfiaError::Store(format!("Account update failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str) -> BillingEvent {
        BillingEvent {
            event_id: "evt_1".to_string(),
            event_type: event_type.to_string(),
            user_id: "u1".to_string(),
            plan: None,
            credits: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_unrecognized_event_type_is_skipped() {
        let update = account_update(&event("invoice.finalized")).unwrap();
        assert!(update.is_none());
    }

    #[test]
    fn test_activation_requires_a_paid_plan() {
        let mut activated = event(SUBSCRIPTION_ACTIVATED);
        assert!(account_update(&activated).is_err());

        activated.plan = Some("free".to_string());
        assert!(account_update(&activated).is_err());

        activated.plan = Some("platinum_forever".to_string());
        assert!(account_update(&activated).is_err());
    }

    #[test]
    fn test_activation_sets_plan_and_expiry() {
        let mut activated = event(SUBSCRIPTION_ACTIVATED);
        activated.plan = Some("premium_monthly".to_string());
        activated.expires_at = Some(Utc::now());

        let update = account_update(&activated).unwrap().unwrap();
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("plan").unwrap(), "premium_monthly");
        assert!(set.contains_key("plan_expires_at"));
        assert!(!update.contains_key("$unset"));
    }

    #[test]
    fn test_activation_without_expiry_clears_it() {
        let mut activated = event(SUBSCRIPTION_ACTIVATED);
        activated.plan = Some("premium_plus".to_string());

        let update = account_update(&activated).unwrap().unwrap();
        assert!(update.get_document("$unset").unwrap().contains_key("plan_expires_at"));
    }

    #[test]
    fn test_cancellation_reverts_to_free() {
        let update = account_update(&event(SUBSCRIPTION_CANCELED)).unwrap().unwrap();
        assert_eq!(update.get_document("$set").unwrap().get_str("plan").unwrap(), "free");
        assert!(update.get_document("$unset").unwrap().contains_key("plan_expires_at"));
    }

    #[test]
    fn test_credits_must_be_positive() {
        let mut purchase = event(PAYMENT_COMPLETED);
        assert!(account_update(&purchase).is_err());

        purchase.credits = Some(0);
        assert!(account_update(&purchase).is_err());

        purchase.credits = Some(-5);
        assert!(account_update(&purchase).is_err());
    }

    #[test]
    fn test_credit_purchase_increments_balance() {
        let mut purchase = event(PAYMENT_COMPLETED);
        purchase.credits = Some(5);

        let update = account_update(&purchase).unwrap().unwrap();
        assert_eq!(
            update.get_document("$inc").unwrap().get_i64("credit_balance").unwrap(),
            5
        );
        // A fresh account created by a credit purchase starts on the free plan.
        assert_eq!(
            update.get_document("$setOnInsert").unwrap().get_str("plan").unwrap(),
            "free"
        );
    }

    #[test]
    fn test_blank_identifiers_are_rejected() {
        let mut purchase = event(PAYMENT_COMPLETED);
        purchase.credits = Some(1);
        purchase.event_id = "  ".to_string();
        purchase.user_id = String::new();

        match account_update(&purchase) {
            Err(ConfiaError::Validation(violations)) => assert_eq!(violations.len(), 2),
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_event_payload_accepts_provider_aliases() {
        let parsed: BillingEvent = serde_json::from_str(
            r#"{"id":"evt_9","type":"payment.completed","userId":"u2","credits":3}"#,
        )
        .unwrap();
        assert_eq!(parsed.event_id, "evt_9");
        assert_eq!(parsed.event_type, PAYMENT_COMPLETED);
        assert_eq!(parsed.credits, Some(3));
    }

    #[test]
    fn test_outcome_wire_format() {
        assert_eq!(
            serde_json::to_value(WebhookOutcome::Applied).unwrap(),
            serde_json::json!("APPLIED")
        );
    }
}
