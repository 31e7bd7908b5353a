//! Authentication for the gateway
//!
//! Identity lives with the hosted auth provider; requests carry its session
//! JWT as a bearer token and the gateway validates the shared-secret
//! signature. There is one user level, no roles.

pub mod jwt;

pub use jwt::{extract_token_from_header, Claims, JwtValidator};

use hyper::Request;

use crate::types::{ConfiaError, Result};

/// Authenticated caller identity for one request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub email: Option<String>,
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
        }
    }
}

/// Authenticate a request, requiring a valid bearer token.
pub fn authenticate<B>(req: &Request<B>, validator: &JwtValidator) -> Result<AuthContext> {
    let token = extract_token_from_header(req.headers())
        .ok_or_else(|| ConfiaError::Auth("Missing bearer token".to_string()))?;
    Ok(validator.validate(&token)?.into())
}

/// Authenticate a request when a token is present.
///
/// Absent token is `Ok(None)`; a present but invalid token is still an
/// error, so broken clients hear about it instead of being silently
/// downgraded to anonymous.
pub fn maybe_authenticate<B>(
    req: &Request<B>,
    validator: &JwtValidator,
) -> Result<Option<AuthContext>> {
    match extract_token_from_header(req.headers()) {
        Some(token) => Ok(Some(validator.validate(&token)?.into())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_token(token: &str) -> Request<()> {
        Request::builder()
            .header("authorization", format!("Bearer {}", token))
            .body(())
            .unwrap()
    }

    #[test]
    fn test_authenticate_requires_token() {
        let validator = JwtValidator::new("test-secret", 3600);
        let bare = Request::builder().body(()).unwrap();
        assert!(authenticate(&bare, &validator).is_err());
    }

    #[test]
    fn test_authenticate_accepts_valid_token() {
        let validator = JwtValidator::new("test-secret", 3600);
        let token = validator.issue("user-7", None).unwrap();

        let ctx = authenticate(&request_with_token(&token), &validator).unwrap();
        assert_eq!(ctx.user_id, "user-7");
    }

    #[test]
    fn test_maybe_authenticate_distinguishes_absent_from_invalid() {
        let validator = JwtValidator::new("test-secret", 3600);

        let bare = Request::builder().body(()).unwrap();
        assert!(maybe_authenticate(&bare, &validator).unwrap().is_none());

        let garbage = request_with_token("not.a.token");
        assert!(maybe_authenticate(&garbage, &validator).is_err());
    }
}
