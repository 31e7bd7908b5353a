//! Database schemas for Confia
//!
//! Defines MongoDB document structures for reviews, subjects, accounts,
//! billing events, and safe date sessions.

mod account;
mod billing_event;
mod date_session;
mod metadata;
mod review;
mod subject;

pub use account::{AccountDoc, ACCOUNT_COLLECTION};
pub use billing_event::{BillingEventDoc, BILLING_EVENT_COLLECTION};
pub use date_session::{DateSessionDoc, DateSessionStatus, DATE_SESSION_COLLECTION};
pub use metadata::Metadata;
pub use review::{Ratings, ReviewDoc, ReviewSnapshot, REVIEW_COLLECTION};
pub use subject::{normalize_term, SubjectDoc, SUBJECT_COLLECTION};
