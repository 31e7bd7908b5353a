//! Configuration for the Confia gateway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

use crate::reviews::{RatingPolicy, ValidationPolicy};

/// Confia - reputation and paywall gateway for the Confia+ platform
#[derive(Parser, Debug, Clone)]
#[command(name = "confia")]
#[command(about = "Reputation and paywall gateway for the Confia+ platform")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "confia")]
    pub mongodb_db: String,

    /// Shared secret for session tokens issued by the auth provider
    /// (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Session token expiry in seconds (used when minting dev tokens)
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Enable development mode (in-memory ledger, insecure JWT secret,
    /// MongoDB optional)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Free-tier reputation query allowance per account
    ///
    /// The legacy handlers disagreed on this value (1 vs 3); it is a single
    /// configuration knob here, never a per-call-site constant.
    #[arg(long, env = "FREE_QUERY_LIMIT", default_value = "3")]
    pub free_query_limit: u32,

    /// Which ratings a submission must supply: "behavior" (behavior rating
    /// only) or "all" (all five)
    #[arg(long, env = "RATING_POLICY", default_value = "behavior")]
    pub rating_policy: String,

    /// Whether the written narrative is mandatory on submission
    #[arg(long, env = "NARRATIVE_REQUIRED", default_value = "true")]
    pub narrative_required: bool,

    /// Shared secret expected in the X-Webhook-Secret header of billing
    /// webhook deliveries (unset = header not checked)
    #[arg(long, env = "BILLING_WEBHOOK_SECRET")]
    pub webhook_secret: Option<String>,

    /// Path for the JSONL analytics event log (unset = analytics disabled)
    #[arg(long, env = "ANALYTICS_LOG")]
    pub analytics_log: Option<PathBuf>,

    /// SMS provider configuration
    #[command(flatten)]
    pub sms: SmsArgs,

    /// Maximum accepted JSON request body in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "65536")]
    pub max_body_bytes: usize,
}

/// SMS provider connection configuration
///
/// Left unset, alert dispatch degrades to log-only (useful in dev mode).
#[derive(Parser, Debug, Clone)]
pub struct SmsArgs {
    /// SMS provider endpoint URL
    #[arg(long, env = "SMS_API_URL")]
    pub sms_api_url: Option<String>,

    /// SMS provider API token
    #[arg(long, env = "SMS_API_TOKEN")]
    pub sms_api_token: Option<String>,

    /// Sender identifier for outbound messages
    #[arg(long, env = "SMS_FROM", default_value = "ConfiaPlus")]
    pub sms_from: String,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        if self.dev_mode {
            Some(
                self.jwt_secret
                    .clone()
                    .unwrap_or_else(|| "dev-only-insecure-secret".to_string()),
            )
        } else {
            self.jwt_secret.clone()
        }
    }

    /// Resolve the submission validation policy from the configured knobs
    pub fn validation_policy(&self) -> ValidationPolicy {
        let required_ratings = if self.rating_policy.eq_ignore_ascii_case("all") {
            RatingPolicy::AllFive
        } else {
            RatingPolicy::BehaviorOnly
        };
        ValidationPolicy {
            required_ratings,
            narrative_required: self.narrative_required,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        match self.rating_policy.to_ascii_lowercase().as_str() {
            "behavior" | "all" => {}
            other => {
                return Err(format!(
                    "RATING_POLICY must be 'behavior' or 'all', got '{other}'"
                ))
            }
        }

        if self.free_query_limit == 0 && !self.dev_mode {
            // A zero free allowance makes every free-tier read a paywall;
            // allowed, but almost always a misconfiguration.
            tracing::warn!("FREE_QUERY_LIMIT=0: free-tier accounts will never get a free query");
        }

        if self.sms.sms_api_url.is_some() && self.sms.sms_api_token.is_none() {
            return Err("SMS_API_TOKEN is required when SMS_API_URL is set".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["confia", "--dev-mode"])
    }

    #[test]
    fn test_dev_mode_jwt_fallback() {
        let args = base_args();
        assert_eq!(args.jwt_secret().as_deref(), Some("dev-only-insecure-secret"));
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        let args = Args::parse_from(["confia"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rating_policy_parsing() {
        let mut args = base_args();
        assert_eq!(
            args.validation_policy().required_ratings,
            RatingPolicy::BehaviorOnly
        );
        args.rating_policy = "ALL".to_string();
        assert_eq!(
            args.validation_policy().required_ratings,
            RatingPolicy::AllFive
        );
    }

    #[test]
    fn test_unknown_rating_policy_rejected() {
        let mut args = base_args();
        args.rating_policy = "some".to_string();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_sms_url_without_token_rejected() {
        let mut args = base_args();
        args.sms.sms_api_url = Some("https://sms.example".to_string());
        args.sms.sms_api_token = None;
        assert!(args.validate().is_err());
    }
}
