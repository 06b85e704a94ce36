//! Session tokens: HS256-signed claims binding a session to an API key.
//!
//! Tokens are stateless. There is no revocation list; disabling the embedded
//! key is what cuts off a gateway session, because the gateway re-resolves the
//! key on every connection.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::error::AuthError;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub api_key: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

/// A freshly issued token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// Issues and verifies session tokens with a shared secret.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        // Only HS256 is accepted; `exp` is required and checked.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `api_key`, valid for the configured lifetime.
    pub fn issue(&self, api_key: &str) -> Result<IssuedToken, AuthError> {
        let iat = Utc::now().timestamp();
        let claims = SessionClaims {
            api_key: api_key.to_string(),
            iat,
            exp: iat + self.ttl.as_secs() as i64,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))?;

        Ok(IssuedToken {
            token,
            expires_in: self.ttl.as_secs(),
        })
    }

    /// Verify signature, algorithm and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Session token rejected");
                AuthError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";
    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_issue_then_verify() {
        let service = TokenService::new(SECRET, DAY);
        let issued = service.issue("my-api-key").unwrap();
        assert_eq!(issued.expires_in, 86_400);

        let claims = service.verify(&issued.token).unwrap();
        assert_eq!(claims.api_key, "my-api-key");
        assert_eq!(claims.exp - claims.iat, 86_400);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issued = TokenService::new(SECRET, DAY).issue("k").unwrap();
        let other = TokenService::new("another-secret", DAY);
        assert!(matches!(other.verify(&issued.token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_wrong_algorithm_rejected() {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            api_key: "k".into(),
            iat: now,
            exp: now + 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let service = TokenService::new(SECRET, DAY);
        assert!(matches!(service.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            api_key: "k".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let service = TokenService::new(SECRET, DAY);
        assert!(matches!(service.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_garbage_rejected() {
        let service = TokenService::new(SECRET, DAY);
        assert!(service.verify("not.a.token").is_err());
        assert!(service.verify("").is_err());
    }
}
