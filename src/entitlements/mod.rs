//! Plans, entitlements, and metered access
//!
//! `resolver` turns stored account state into capabilities; `ledger` owns
//! the atomic consumption of free queries and credits.

pub mod ledger;
pub mod resolver;

pub use ledger::{AccessLedger, ConsumeKind, ConsumeResult, InMemoryLedger, MongoAccessLedger};
pub use resolver::{
    decide_access, resolve, AccessDecision, AccessReason, BlockReason, Entitlement, Plan, PlanTier,
};
