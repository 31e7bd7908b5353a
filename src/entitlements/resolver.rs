//! Entitlement resolution
//!
//! Pure, total mapping from stored plan/credit state to the capabilities a
//! user currently holds. Unknown plan identifiers resolve to free: fail
//! closed, never open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::schemas::AccountDoc;

/// Subscription plans, a small closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    PremiumMonthly,
    PremiumYearly,
    PremiumPlus,
}

/// Capability tiers form a strict hierarchy; an inactive paid plan demotes
/// to the free tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlanTier {
    Free,
    Premium,
    PremiumPlus,
}

impl Plan {
    /// Parse a stored plan identifier; anything unrecognized is free.
    pub fn parse(raw: &str) -> Plan {
        match raw.trim().to_lowercase().as_str() {
            "premium_monthly" => Plan::PremiumMonthly,
            "premium_yearly" => Plan::PremiumYearly,
            "premium_plus" => Plan::PremiumPlus,
            _ => Plan::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::PremiumMonthly => "premium_monthly",
            Plan::PremiumYearly => "premium_yearly",
            Plan::PremiumPlus => "premium_plus",
        }
    }

    pub fn tier(&self) -> PlanTier {
        match self {
            Plan::Free => PlanTier::Free,
            Plan::PremiumMonthly | Plan::PremiumYearly => PlanTier::Premium,
            Plan::PremiumPlus => PlanTier::PremiumPlus,
        }
    }
}

/// Why a blocked user cannot submit: never paid vs. paid plan lapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    NoCredits,
    NoActivePlan,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::NoCredits => "NO_CREDITS",
            BlockReason::NoActivePlan => "NO_ACTIVE_PLAN",
        }
    }
}

/// Resolved capability set for one user at one instant
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub plan: Plan,
    pub effective_plan_active: bool,
    pub credits: i64,
    pub can_submit_review: bool,
    pub can_view_full_result: bool,
    pub can_use_advanced_analysis: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
}

/// Resolve an account's entitlement at `now`.
pub fn resolve(account: &AccountDoc, now: DateTime<Utc>) -> Entitlement {
    let plan = Plan::parse(&account.plan);

    let effective_plan_active = plan != Plan::Free
        && account
            .plan_expires_at
            .map(|expires| expires.to_chrono() > now)
            .unwrap_or(true);

    let credits = account.credit_balance.max(0);
    let can_submit_review = effective_plan_active || credits > 0;

    let effective_tier = if effective_plan_active {
        plan.tier()
    } else {
        PlanTier::Free
    };

    let block_reason = if can_submit_review {
        None
    } else if plan == Plan::Free {
        Some(BlockReason::NoCredits)
    } else {
        Some(BlockReason::NoActivePlan)
    };

    Entitlement {
        plan,
        effective_plan_active,
        credits,
        can_submit_review,
        can_view_full_result: effective_tier >= PlanTier::Premium,
        can_use_advanced_analysis: effective_tier >= PlanTier::PremiumPlus,
        block_reason,
    }
}

/// Whether a gated operation may proceed, and why not when it may not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessReason {
    Ok,
    FreeLimitReached,
    Paywall,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::Ok => "OK",
            AccessReason::FreeLimitReached => "FREE_LIMIT_REACHED",
            AccessReason::Paywall => "PAYWALL",
        }
    }
}

/// Derived access decision for gated reads; never persisted
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: AccessReason,
    pub plan: Plan,
    pub credits: i64,
    pub free_queries_used: i64,
    pub free_query_limit: u32,
}

/// Decide whether a gated read may proceed, without consuming anything.
///
/// Order: an active plan is unmetered, then credits, then the free
/// allowance. The blocked reason distinguishes a free account that ran out
/// (`FREE_LIMIT_REACHED`) from a lapsed paid account (`PAYWALL`).
pub fn decide_access(account: &AccountDoc, now: DateTime<Utc>, free_query_limit: u32) -> AccessDecision {
    let entitlement = resolve(account, now);
    let free_queries_used = account.free_queries_used.max(0);

    let (allowed, reason) = if entitlement.effective_plan_active {
        (true, AccessReason::Ok)
    } else if entitlement.credits > 0 {
        (true, AccessReason::Ok)
    } else if free_queries_used < i64::from(free_query_limit) {
        (true, AccessReason::Ok)
    } else if entitlement.plan == Plan::Free {
        (false, AccessReason::FreeLimitReached)
    } else {
        (false, AccessReason::Paywall)
    };

    AccessDecision {
        allowed,
        reason,
        plan: entitlement.plan,
        credits: entitlement.credits,
        free_queries_used,
        free_query_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::DateTime as BsonDateTime;
    use chrono::Duration;

    fn account(plan: &str, expires: Option<DateTime<Utc>>, credits: i64, used: i64) -> AccountDoc {
        AccountDoc {
            plan: plan.to_string(),
            plan_expires_at: expires.map(BsonDateTime::from_chrono),
            credit_balance: credits,
            free_queries_used: used,
            ..AccountDoc::new("u1", None)
        }
    }

    #[test]
    fn test_active_premium_monthly() {
        let now = Utc::now();
        let acct = account("premium_monthly", Some(now + Duration::days(10)), 0, 0);
        let e = resolve(&acct, now);
        assert!(e.effective_plan_active);
        assert!(e.can_submit_review);
        assert!(e.can_view_full_result);
        assert!(!e.can_use_advanced_analysis);
        assert_eq!(e.block_reason, None);
    }

    #[test]
    fn test_expired_premium_demotes_to_free_rules() {
        let now = Utc::now();
        let acct = account("premium_monthly", Some(now - Duration::days(1)), 0, 0);
        let e = resolve(&acct, now);
        assert!(!e.effective_plan_active);
        assert!(!e.can_submit_review);
        assert!(!e.can_view_full_result);
        assert_eq!(e.block_reason, Some(BlockReason::NoActivePlan));
    }

    #[test]
    fn test_expired_premium_with_credits_can_submit() {
        let now = Utc::now();
        let acct = account("premium_monthly", Some(now - Duration::days(1)), 3, 0);
        let e = resolve(&acct, now);
        assert!(!e.effective_plan_active);
        assert!(e.can_submit_review);
        assert_eq!(e.block_reason, None);
    }

    #[test]
    fn test_absent_expiry_means_non_expiring() {
        let now = Utc::now();
        let acct = account("premium_yearly", None, 0, 0);
        assert!(resolve(&acct, now).effective_plan_active);
    }

    #[test]
    fn test_unknown_plan_fails_closed() {
        let now = Utc::now();
        let acct = account("premium_ultra_deluxe", None, 0, 0);
        let e = resolve(&acct, now);
        assert_eq!(e.plan, Plan::Free);
        assert!(!e.effective_plan_active);
        assert_eq!(e.block_reason, Some(BlockReason::NoCredits));
    }

    #[test]
    fn test_premium_plus_unlocks_advanced_analysis() {
        let now = Utc::now();
        let acct = account("premium_plus", None, 0, 0);
        let e = resolve(&acct, now);
        assert!(e.can_view_full_result);
        assert!(e.can_use_advanced_analysis);
    }

    #[test]
    fn test_free_account_with_credits() {
        let now = Utc::now();
        let acct = account("free", None, 2, 0);
        let e = resolve(&acct, now);
        assert!(!e.effective_plan_active);
        assert!(e.can_submit_review);
        assert!(!e.can_view_full_result);
    }

    #[test]
    fn test_decision_order() {
        let now = Utc::now();
        let limit = 3;

        let active = account("premium_monthly", None, 0, 99);
        assert_eq!(decide_access(&active, now, limit).reason, AccessReason::Ok);

        let credited = account("free", None, 1, 99);
        let d = decide_access(&credited, now, limit);
        assert!(d.allowed);
        assert_eq!(d.reason, AccessReason::Ok);

        let fresh_free = account("free", None, 0, 2);
        assert!(decide_access(&fresh_free, now, limit).allowed);

        let exhausted_free = account("free", None, 0, 3);
        let d = decide_access(&exhausted_free, now, limit);
        assert!(!d.allowed);
        assert_eq!(d.reason, AccessReason::FreeLimitReached);

        let lapsed = account("premium_yearly", Some(now - Duration::days(2)), 0, 3);
        let d = decide_access(&lapsed, now, limit);
        assert!(!d.allowed);
        assert_eq!(d.reason, AccessReason::Paywall);
    }

    #[test]
    fn test_reason_wire_format() {
        assert_eq!(
            serde_json::to_value(AccessReason::FreeLimitReached).unwrap(),
            serde_json::json!("FREE_LIMIT_REACHED")
        );
        assert_eq!(
            serde_json::to_value(Plan::PremiumMonthly).unwrap(),
            serde_json::json!("premium_monthly")
        );
    }
}
