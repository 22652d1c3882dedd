//! Request extractors: bearer-token user and the OAuth2 password form

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Multipart, Request},
    http::{header, request::Parts},
    Form,
};
use serde::Deserialize;

use crate::auth::Claims;
use crate::db::User;
use crate::error::ApiError;

use super::state::AppState;

// ============================================================================
// AuthUser
// ============================================================================

/// Authenticated, active user
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

        let claims = state.auth().authenticate(token)?;

        let user = state
            .db()
            .find_user_by_name(&claims.sub)?
            .ok_or_else(|| ApiError::unauthorized("認證失敗"))?;

        if !user.is_active {
            return Err(ApiError::bad_request("用戶已停用"));
        }

        Ok(AuthUser { user, claims })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

// ============================================================================
// LoginForm
// ============================================================================

/// OAuth2 password grant fields, urlencoded or multipart
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[async_trait]
impl<S> FromRequest<S> for LoginForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("multipart/form-data"))
            .unwrap_or(false);

        if !is_multipart {
            let Form(form) = Form::<LoginForm>::from_request(req, state)
                .await
                .map_err(|e| ApiError::Unprocessable(e.body_text()))?;
            return Ok(form);
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::Unprocessable(e.body_text()))?;

        let mut username = None;
        let mut password = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Unprocessable(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::Unprocessable(e.body_text()))?;
            match name.as_str() {
                "username" => username = Some(value),
                "password" => password = Some(value),
                _ => {}
            }
        }

        match (username, password) {
            (Some(username), Some(password)) => Ok(LoginForm { username, password }),
            _ => Err(ApiError::Unprocessable(
                "username and password are required".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts_with(auth: Option<&str>) -> Parts {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }
}
