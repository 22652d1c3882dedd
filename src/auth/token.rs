//! JWT access tokens (HS256)

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;

pub const ACCESS_TOKEN_TYPE: &str = "access_token";

/// Token payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User name
    pub sub: String,
    /// User id
    pub id: i64,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id, used for logout
    pub jti: String,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    /// `None` when the configured minutes overflow a `Duration`
    lifetime: Option<Duration>,
}

impl JwtManager {
    /// # Arguments
    /// * `secret` - HS256 key
    /// * `expire_minutes` - token lifetime
    pub fn new(secret: &str, expire_minutes: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime: Duration::try_minutes(expire_minutes),
        }
    }

    pub fn issue(&self, user_id: i64, user_name: &str) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let expires = self
            .lifetime
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(AuthError::Lifetime)?;
        let claims = Claims {
            sub: user_name.to_string(),
            id: user_id,
            token_type: ACCESS_TOKEN_TYPE.to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedToken { token, claims })
    }

    /// Signature, expiry and token type
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!("Token rejected: {}", e);
            AuthError::InvalidToken
        })?;

        if data.claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AuthError::InvalidToken);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let jwt = JwtManager::new("secret", 30);
        let issued = jwt.issue(7, "alice").unwrap();

        let claims = jwt.verify(&issued.token).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.id, 7);
        assert_eq!(claims.token_type, "access_token");
        assert_eq!(claims.exp - claims.iat, 30 * 60);
    }

    #[test]
    fn test_unique_jti() {
        let jwt = JwtManager::new("secret", 30);
        let a = jwt.issue(1, "alice").unwrap();
        let b = jwt.issue(1, "alice").unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
    }

    #[test]
    fn test_wrong_secret() {
        let issued = JwtManager::new("secret", 30).issue(1, "alice").unwrap();
        let other = JwtManager::new("other", 30);
        assert!(matches!(
            other.verify(&issued.token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired() {
        let jwt = JwtManager::new("secret", -5);
        let issued = jwt.issue(1, "alice").unwrap();
        assert!(matches!(jwt.verify(&issued.token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_lifetime_overflow_is_error() {
        let jwt = JwtManager::new("secret", i64::MAX);
        assert!(matches!(jwt.issue(1, "alice"), Err(AuthError::Lifetime)));

        // representable as a Duration but past the last DateTime
        let jwt = JwtManager::new("secret", i64::MAX / 60_000);
        assert!(matches!(jwt.issue(1, "alice"), Err(AuthError::Lifetime)));
    }

    #[test]
    fn test_garbage() {
        let jwt = JwtManager::new("secret", 30);
        assert!(jwt.verify("not.a.jwt").is_err());
    }

    #[test]
    fn test_expires_at() {
        let jwt = JwtManager::new("secret", 30);
        let issued = jwt.issue(1, "alice").unwrap();
        assert_eq!(issued.claims.expires_at().timestamp(), issued.claims.exp);
    }
}
