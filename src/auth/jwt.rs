//! Session token validation
//!
//! Sessions are JWTs minted by the hosted auth provider and shared-secret
//! signed (HS256). The gateway only validates; issuing is reserved for dev
//! mode, where no provider is running.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::{ConfiaError, Result};

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Auth-provider user id
    pub sub: String,

    /// Email, if the provider shares it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Issued at (unix seconds)
    pub iat: i64,

    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Validates (and in dev mode issues) session tokens
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_seconds: u64,
}

impl JwtValidator {
    pub fn new(secret: &str, expiry_seconds: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_seconds,
        }
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| ConfiaError::Auth(format!("Invalid session token: {}", e)))
    }

    /// Issue a token. Used by the dev-mode token endpoint only; production
    /// tokens come from the auth provider.
    pub fn issue(&self, user_id: &str, email: Option<&str>) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.map(|e| e.to_string()),
            iat: now,
            exp: now + self.expiry_seconds as i64,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ConfiaError::Auth(format!("Failed to issue token: {}", e)))
    }
}

/// Extract a bearer token from an Authorization header map.
pub fn extract_token_from_header(headers: &hyper::HeaderMap) -> Option<String> {
    headers
        .get(hyper::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, AUTHORIZATION};

    #[test]
    fn test_issue_and_validate_round_trip() {
        let validator = JwtValidator::new("test-secret", 3600);
        let token = validator.issue("user-1", Some("user@example.com")).unwrap();

        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtValidator::new("secret-a", 3600);
        let validator = JwtValidator::new("secret-b", 3600);

        let token = issuer.issue("user-1", None).unwrap();
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let validator = JwtValidator::new("test-secret", 3600);
        let now = Utc::now().timestamp();
        let stale = Claims {
            sub: "user-1".to_string(),
            email: None,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &stale,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = hyper::HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(
            extract_token_from_header(&headers).as_deref(),
            Some("abc.def.ghi")
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(extract_token_from_header(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_token_from_header(&headers), None);

        headers.remove(AUTHORIZATION);
        assert_eq!(extract_token_from_header(&headers), None);
    }
}
