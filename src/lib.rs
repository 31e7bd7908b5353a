//! Confia - reputation and paywall gateway for the Confia+ platform
//!
//! Confia+ lets users look up and review the people they are about to meet.
//! This gateway is the backend: review submission and storage, reputation
//! aggregation, and the freemium paywall that meters gated reads through a
//! free allowance, purchasable credits, and subscription plans.
//!
//! ## Services
//!
//! - **Reviews**: validated submission, edit history, soft deletion
//! - **Reputation**: per-subject aggregation with tier-based visibility
//! - **Entitlements**: plan/credit resolution and atomic consumption
//! - **Billing**: idempotent webhook processing from the payment provider
//! - **Safety**: emergency SMS alerts and safe date sessions

pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod entitlements;
pub mod flags;
pub mod logging;
pub mod reviews;
pub mod routes;
pub mod safety;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ConfiaError, Result};
