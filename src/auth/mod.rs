//! Auth module - password hashing, JWT access tokens and logout
//!
//! ## Usage
//! ```rust,ignore
//! let auth = AuthService::new(&config.auth);
//! let issued = auth.issue(user.id, &user.user_name)?;
//! let claims = auth.authenticate(&issued.token)?;
//! auth.logout(&claims);
//! ```

mod blacklist;
mod password;
mod token;

pub use blacklist::TokenBlacklist;
pub use password::{hash_password, verify_password};
pub use token::{Claims, IssuedToken, JwtManager, ACCESS_TOKEN_TYPE};

use crate::config::AuthConfig;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token has been revoked")]
    Revoked,

    #[error("token lifetime out of range")]
    Lifetime,

    #[error("failed to issue token: {0}")]
    Issue(#[from] jsonwebtoken::errors::Error),
}

/// Token issuing + verification with revocation
pub struct AuthService {
    jwt: JwtManager,
    blacklist: TokenBlacklist,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            jwt: JwtManager::new(&config.jwt_secret, config.token_expire_minutes),
            blacklist: TokenBlacklist::new(),
        }
    }

    pub fn issue(&self, user_id: i64, user_name: &str) -> Result<IssuedToken, AuthError> {
        self.jwt.issue(user_id, user_name)
    }

    /// Verify a bearer token and reject revoked ones
    pub fn authenticate(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self.jwt.verify(token)?;
        if self.blacklist.is_revoked(&claims.jti) {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// Revoke the token until its own expiry
    pub fn logout(&self, claims: &Claims) {
        self.blacklist.revoke(&claims.jti, claims.expires_at());
        tracing::info!("User {} logged out", claims.sub);
    }

    pub fn blacklist(&self) -> &TokenBlacklist {
        &self.blacklist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(&AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_expire_minutes: 30,
        })
    }

    #[test]
    fn test_logout_revokes_only_that_token() {
        let auth = service();
        let first = auth.issue(1, "alice").unwrap();
        let second = auth.issue(1, "alice").unwrap();

        let claims = auth.authenticate(&first.token).unwrap();
        auth.logout(&claims);

        assert!(matches!(
            auth.authenticate(&first.token),
            Err(AuthError::Revoked)
        ));
        assert!(auth.authenticate(&second.token).is_ok());
        assert_eq!(auth.blacklist().len(), 1);
    }
}
