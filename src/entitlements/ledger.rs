//! Access ledger
//!
//! Consumption of the free allowance and paid credits. Every consumption is
//! an atomic check-and-decrement: the precondition (queries remaining,
//! credits remaining) and the mutation commit together or not at all, so
//! concurrent requests can never double-spend. Exhaustion is an ordinary
//! outcome, not an error.

use async_trait::async_trait;
use bson::{doc, DateTime};
use dashmap::DashMap;
use mongodb::options::UpdateOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::is_duplicate_key_error;
use crate::db::schemas::{AccountDoc, ACCOUNT_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::entitlements::resolver::AccessReason;
use crate::types::{ConfiaError, Result};

/// What a consumption draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumeKind {
    FreeQuery,
    Credit,
    FeatureAction,
}

/// Outcome of a consumption attempt
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResult {
    pub consumed: bool,
    pub kind: ConsumeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<AccessReason>,
    pub remaining: i64,
}

impl ConsumeResult {
    fn consumed(kind: ConsumeKind, remaining: i64) -> Self {
        Self {
            consumed: true,
            kind,
            reason: None,
            remaining: remaining.max(0),
        }
    }

    fn exhausted(kind: ConsumeKind, reason: AccessReason) -> Self {
        Self {
            consumed: false,
            kind,
            reason: Some(reason),
            remaining: 0,
        }
    }
}

/// Account state plus atomic consumption, backed by MongoDB in production
/// and by an in-memory map in dev mode and tests.
#[async_trait]
pub trait AccessLedger: Send + Sync {
    /// Free gated reads each account gets before metering starts
    fn free_query_limit(&self) -> u32;

    /// Current account state; users never touched before read as a fresh
    /// free account without persisting one.
    async fn account(&self, user_id: &str) -> Result<AccountDoc>;

    /// Attempt to consume one unit of `kind` for `user_id`.
    async fn try_consume(&self, user_id: &str, kind: ConsumeKind) -> Result<ConsumeResult>;
}

/// MongoDB-backed ledger. Preconditions ride in the update filter so the
/// server performs the check and the decrement as one document operation.
pub struct MongoAccessLedger {
    accounts: MongoCollection<AccountDoc>,
    free_query_limit: u32,
}

impl MongoAccessLedger {
    pub async fn new(client: &MongoClient, free_query_limit: u32) -> Result<Self> {
        Ok(Self {
            accounts: client.collection(ACCOUNT_COLLECTION).await?,
            free_query_limit,
        })
    }

    /// Create the account row if absent. Concurrent callers race benignly;
    /// the unique index on user_id keeps one row per user.
    async fn ensure_account(&self, user_id: &str) -> Result<()> {
        let now = DateTime::now();
        let update = doc! {
            "$setOnInsert": {
                "plan": "free",
                "credit_balance": 0_i64,
                "free_queries_used": 0_i64,
                "emergency_contacts": [],
                "metadata": {
                    "is_deleted": false,
                    "created_at": now,
                    "updated_at": now,
                },
            }
        };

        let options = UpdateOptions::builder().upsert(true).build();
        match self
            .accounts
            .inner()
            .update_one(doc! { "user_id": user_id }, update)
            .with_options(options)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => Ok(()),
            Err(e) => Err(ConfiaError::Store(format!("Account upsert failed: {}", e))),
        }
    }
}

#[async_trait]
impl AccessLedger for MongoAccessLedger {
    fn free_query_limit(&self) -> u32 {
        self.free_query_limit
    }

    async fn account(&self, user_id: &str) -> Result<AccountDoc> {
        match self.accounts.find_one(doc! { "user_id": user_id }).await? {
            Some(account) => Ok(account),
            None => Ok(AccountDoc::new(user_id, None)),
        }
    }

    async fn try_consume(&self, user_id: &str, kind: ConsumeKind) -> Result<ConsumeResult> {
        self.ensure_account(user_id).await?;
        let now = DateTime::now();

        match kind {
            ConsumeKind::FreeQuery => {
                let limit = i64::from(self.free_query_limit);
                let filter = doc! {
                    "user_id": user_id,
                    "free_queries_used": { "$lt": limit },
                };
                let update = doc! {
                    "$inc": { "free_queries_used": 1_i64 },
                    "$set": { "metadata.updated_at": now },
                };

                match self.accounts.find_one_and_update(filter, update).await? {
                    Some(account) => Ok(ConsumeResult::consumed(
                        kind,
                        limit - account.free_queries_used,
                    )),
                    None => Ok(ConsumeResult::exhausted(kind, AccessReason::FreeLimitReached)),
                }
            }
            ConsumeKind::Credit | ConsumeKind::FeatureAction => {
                let filter = doc! {
                    "user_id": user_id,
                    "credit_balance": { "$gt": 0_i64 },
                };
                let update = doc! {
                    "$inc": { "credit_balance": -1_i64 },
                    "$set": { "metadata.updated_at": now },
                };

                match self.accounts.find_one_and_update(filter, update).await? {
                    Some(account) => Ok(ConsumeResult::consumed(kind, account.credit_balance)),
                    None => Ok(ConsumeResult::exhausted(kind, AccessReason::Paywall)),
                }
            }
        }
    }
}

/// In-memory ledger for dev mode and tests. The DashMap entry guard holds
/// the shard write lock across the check-and-decrement, giving the same
/// exactly-once guarantee as the MongoDB filter precondition.
pub struct InMemoryLedger {
    accounts: DashMap<String, AccountDoc>,
    free_query_limit: u32,
}

impl InMemoryLedger {
    pub fn new(free_query_limit: u32) -> Self {
        Self {
            accounts: DashMap::new(),
            free_query_limit,
        }
    }

    /// Add purchased credits to an account, creating it if needed.
    pub fn grant_credits(&self, user_id: &str, amount: i64) {
        let mut account = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| AccountDoc::new(user_id, None));
        account.credit_balance += amount;
    }

    /// Set the stored plan and expiry for an account, creating it if needed.
    pub fn set_plan(&self, user_id: &str, plan: &str, plan_expires_at: Option<DateTime>) {
        let mut account = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| AccountDoc::new(user_id, None));
        account.plan = plan.to_string();
        account.plan_expires_at = plan_expires_at;
    }
}

#[async_trait]
impl AccessLedger for InMemoryLedger {
    fn free_query_limit(&self) -> u32 {
        self.free_query_limit
    }

    async fn account(&self, user_id: &str) -> Result<AccountDoc> {
        Ok(self
            .accounts
            .get(user_id)
            .map(|account| account.clone())
            .unwrap_or_else(|| AccountDoc::new(user_id, None)))
    }

    async fn try_consume(&self, user_id: &str, kind: ConsumeKind) -> Result<ConsumeResult> {
        let mut account = self
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| AccountDoc::new(user_id, None));

        match kind {
            ConsumeKind::FreeQuery => {
                let limit = i64::from(self.free_query_limit);
                if account.free_queries_used < limit {
                    account.free_queries_used += 1;
                    Ok(ConsumeResult::consumed(kind, limit - account.free_queries_used))
                } else {
                    Ok(ConsumeResult::exhausted(kind, AccessReason::FreeLimitReached))
                }
            }
            ConsumeKind::Credit | ConsumeKind::FeatureAction => {
                if account.credit_balance > 0 {
                    account.credit_balance -= 1;
                    Ok(ConsumeResult::consumed(kind, account.credit_balance))
                } else {
                    Ok(ConsumeResult::exhausted(kind, AccessReason::Paywall))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_free_allowance_consumes_until_limit() {
        let ledger = InMemoryLedger::new(3);

        for remaining in [2, 1, 0] {
            let result = ledger.try_consume("maria", ConsumeKind::FreeQuery).await.unwrap();
            assert!(result.consumed);
            assert_eq!(result.remaining, remaining);
            assert_eq!(result.reason, None);
        }

        let blocked = ledger.try_consume("maria", ConsumeKind::FreeQuery).await.unwrap();
        assert!(!blocked.consumed);
        assert_eq!(blocked.reason, Some(AccessReason::FreeLimitReached));
        assert_eq!(blocked.remaining, 0);
    }

    #[tokio::test]
    async fn test_credit_consumption_and_exhaustion() {
        let ledger = InMemoryLedger::new(3);
        ledger.grant_credits("ana", 2);

        let first = ledger.try_consume("ana", ConsumeKind::Credit).await.unwrap();
        assert!(first.consumed);
        assert_eq!(first.remaining, 1);

        let second = ledger.try_consume("ana", ConsumeKind::FeatureAction).await.unwrap();
        assert!(second.consumed);
        assert_eq!(second.remaining, 0);

        let blocked = ledger.try_consume("ana", ConsumeKind::Credit).await.unwrap();
        assert!(!blocked.consumed);
        assert_eq!(blocked.reason, Some(AccessReason::Paywall));
    }

    #[tokio::test]
    async fn test_account_read_does_not_persist() {
        let ledger = InMemoryLedger::new(3);

        let account = ledger.account("ghost").await.unwrap();
        assert_eq!(account.plan, "free");
        assert_eq!(account.credit_balance, 0);
        assert!(ledger.accounts.get("ghost").is_none());
    }

    #[tokio::test]
    async fn test_single_credit_has_exactly_one_winner() {
        let ledger = Arc::new(InMemoryLedger::new(0));
        ledger.grant_credits("carla", 1);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.try_consume("carla", ConsumeKind::Credit).await.unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().consumed {
                wins += 1;
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(ledger.account("carla").await.unwrap().credit_balance, 0);
    }

    #[tokio::test]
    async fn test_free_limit_holds_under_contention() {
        let ledger = Arc::new(InMemoryLedger::new(3));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.try_consume("bea", ConsumeKind::FreeQuery).await.unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().consumed {
                wins += 1;
            }
        }

        assert_eq!(wins, 3);
        assert_eq!(ledger.account("bea").await.unwrap().free_queries_used, 3);
    }

    #[test]
    fn test_kind_wire_format() {
        assert_eq!(
            serde_json::to_value(ConsumeKind::FreeQuery).unwrap(),
            serde_json::json!("FREE_QUERY")
        );
        assert_eq!(
            serde_json::to_value(ConsumeKind::FeatureAction).unwrap(),
            serde_json::json!("FEATURE_ACTION")
        );
    }
}
