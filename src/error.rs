//! HTTP error type
//!
//! Error bodies are `{"detail": "..."}`. A failed search is the exception and
//! answers `{"error": "..."}` so that the frontend can show it inline.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::db::DbError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// 401 with `WWW-Authenticate: Bearer`
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    /// RAG pipeline failure on /api/search
    #[error("處理請求時發生錯誤: {0}")]
    Search(String),

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn search(message: impl std::fmt::Display) -> Self {
        Self::Search(message.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Search(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken => ApiError::unauthorized("認證失敗"),
            AuthError::Revoked => ApiError::unauthorized("token已登出"),
            AuthError::Lifetime => ApiError::Internal(anyhow::anyhow!("Token lifetime out of range")),
            AuthError::Issue(e) => ApiError::Internal(anyhow::anyhow!("Failed to issue token: {}", e)),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::DuplicateUserName => ApiError::bad_request("用戶名已被使用"),
            DbError::DuplicateEmail => ApiError::bad_request("email已被使用"),
            DbError::Other(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match self {
            ApiError::Search(cause) => {
                let message = format!("處理請求時發生錯誤: {}", cause);
                tracing::error!("{}", message);
                (status, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:#}", err);
                (status, Json(json!({ "detail": "Internal Server Error" }))).into_response()
            }
            ApiError::Unauthorized(detail) => (
                status,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "detail": detail })),
            )
                .into_response(),
            ApiError::BadRequest(detail)
            | ApiError::NotFound(detail)
            | ApiError::Unprocessable(detail)
            | ApiError::ServiceUnavailable(detail) => {
                (status, Json(json!({ "detail": detail }))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unauthorized_has_bearer_challenge() {
        let response = ApiError::from(AuthError::Revoked).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert_eq!(body_json(response).await["detail"], "token已登出");
    }

    #[tokio::test]
    async fn test_duplicate_user_is_bad_request() {
        let response = ApiError::from(DbError::DuplicateEmail).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "email已被使用");
    }

    #[tokio::test]
    async fn test_search_error_body() {
        let response = ApiError::search("quota exceeded").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["error"],
            "處理請求時發生錯誤: quota exceeded"
        );
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = ApiError::from(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["detail"], "Internal Server Error");
    }
}
