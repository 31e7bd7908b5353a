//! Outbound SMS delivery
//!
//! Thin client for the SMS provider's HTTP API. When no provider is
//! configured (dev mode, tests) delivery degrades to structured logging so
//! the alert path stays exercisable end to end.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SmsArgs;
use crate::types::{ConfiaError, Result};

/// SMS provider connection settings
#[derive(Debug, Clone, Default)]
pub struct SmsConfig {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub from: String,
}

impl From<&SmsArgs> for SmsConfig {
    fn from(args: &SmsArgs) -> Self {
        Self {
            api_url: args.sms_api_url.clone(),
            api_token: args.sms_api_token.clone(),
            from: args.sms_from.clone(),
        }
    }
}

#[derive(Serialize)]
struct OutboundSms<'a> {
    to: &'a str,
    from: &'a str,
    message: &'a str,
}

/// SMS delivery client
pub struct SmsClient {
    config: SmsConfig,
    http_client: reqwest::Client,
}

impl SmsClient {
    pub fn new(config: SmsConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            http_client,
        }
    }

    /// Whether a real provider is configured
    pub fn is_configured(&self) -> bool {
        self.config.api_url.is_some() && self.config.api_token.is_some()
    }

    /// Send one message to one recipient.
    pub async fn send(&self, to: &str, message: &str) -> Result<()> {
        let (api_url, api_token) = match (&self.config.api_url, &self.config.api_token) {
            (Some(url), Some(token)) => (url, token),
            _ => {
                info!(
                    to = %to,
                    message = %message,
                    "SMS provider not configured, logging message instead"
                );
                return Ok(());
            }
        };

        let payload = OutboundSms {
            to,
            from: &self.config.from,
            message,
        };

        let response = self
            .http_client
            .post(api_url)
            .bearer_auth(api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ConfiaError::Sms(format!("SMS request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConfiaError::Sms(format!(
                "SMS provider returned {}: {}",
                status, body
            )));
        }

        debug!(to = %to, "SMS dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_client_is_log_only() {
        let client = SmsClient::new(SmsConfig::default());
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_send_succeeds_without_network() {
        let client = SmsClient::new(SmsConfig {
            api_url: None,
            api_token: None,
            from: "ConfiaPlus".to_string(),
        });
        client.send("+5511999990000", "test alert").await.unwrap();
    }

    #[test]
    fn test_config_from_args() {
        let config = SmsConfig::from(&SmsArgs {
            sms_api_url: Some("https://sms.example/send".to_string()),
            sms_api_token: Some("tok".to_string()),
            sms_from: "ConfiaPlus".to_string(),
        });
        let client = SmsClient::new(config);
        assert!(client.is_configured());
    }
}
