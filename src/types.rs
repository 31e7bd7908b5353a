//! Error types for the Confia gateway
//!
//! The taxonomy mirrors how callers are expected to react:
//! - `Validation` carries every violation found, is never retried, and maps
//!   to a 400 with the full message list.
//! - `Auth` is a missing/invalid session, distinct from a paywall so clients
//!   don't confuse "log in" with "pay". Paywall outcomes are *values*
//!   ([`crate::entitlements::ConsumeResult`] et al.), never errors.
//! - `Store` is a transient storage failure; callers may retry with backoff,
//!   this service never retries on their behalf.

use hyper::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ConfiaError>;

/// Gateway error type
#[derive(Error, Debug)]
pub enum ConfiaError {
    /// Transient storage failure: unreachable or timed-out MongoDB
    #[error("Store error: {0}")]
    Store(String),

    /// Missing or invalid session token
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Caller-correctable payload violations, always the complete list
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Malformed HTTP request (unreadable/oversized/non-JSON body)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Startup/configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// SMS provider failure (always a best-effort side channel)
    #[error("SMS dispatch error: {0}")]
    Sms(String),

    /// Socket-level failure in the accept loop
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfiaError {
    /// HTTP status this error maps to at the boundary
    pub fn status(&self) -> StatusCode {
        match self {
            ConfiaError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ConfiaError::Auth(_) => StatusCode::UNAUTHORIZED,
            ConfiaError::Validation(_) | ConfiaError::Http(_) => StatusCode::BAD_REQUEST,
            ConfiaError::Config(_) | ConfiaError::Sms(_) | ConfiaError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable code for the JSON error body
    pub fn code(&self) -> &'static str {
        match self {
            ConfiaError::Store(_) => "STORE_UNAVAILABLE",
            ConfiaError::Auth(_) => "UNAUTHENTICATED",
            ConfiaError::Validation(_) => "VALIDATION",
            ConfiaError::Http(_) => "BAD_REQUEST",
            ConfiaError::Config(_) => "CONFIG_ERROR",
            ConfiaError::Sms(_) => "SMS_ERROR",
            ConfiaError::Io(_) => "IO_ERROR",
        }
    }
}
