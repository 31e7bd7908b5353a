//! Review domain: submission validation, persistence, and reputation
//! aggregation
//!
//! Validation and aggregation are pure; `ReviewStore` owns the collections.
//! Entitlement gating lives in the route handlers.

pub mod aggregate;
pub mod store;
pub mod validate;

pub use aggregate::{aggregate, AggregateResult, ViewerContext};
pub use store::ReviewStore;
pub use validate::{
    validate, validate_edit, NormalizedReview, RatingPolicy, SubmitReviewRequest, ValidationPolicy,
};
