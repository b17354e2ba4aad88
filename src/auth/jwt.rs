use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub exp: i64,
}

/// Verifies HS256 bearer tokens issued by the user service.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Resolve the user id carried by `token`.
    pub fn verify(&self, token: &str) -> CoreResult<i64> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "Rejected bearer token");
            CoreError::Forbidden("invalid or expired token".to_string())
        })?;
        Ok(data.claims.user_id)
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

/// Sign a token the way the user service does.
pub fn sign_token(secret: &str, user_id: i64, ttl: Duration) -> CoreResult<String> {
    let claims = Claims {
        user_id,
        exp: (Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| CoreError::Fatal(format!("failed to sign token: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_round_trip() {
        let token = sign_token("s3cret", 42, Duration::hours(1)).unwrap();
        assert_eq!(TokenVerifier::new("s3cret").verify(&token).unwrap(), 42);
    }

    #[test]
    fn test_wrong_secret_is_forbidden() {
        let token = sign_token("s3cret", 42, Duration::hours(1)).unwrap();
        assert!(matches!(
            TokenVerifier::new("other").verify(&token),
            Err(CoreError::Forbidden(_))
        ));
    }

    #[test]
    fn test_expired_token_is_forbidden() {
        let token = sign_token("s3cret", 42, Duration::hours(-2)).unwrap();
        assert!(TokenVerifier::new("s3cret").verify(&token).is_err());
    }
}
