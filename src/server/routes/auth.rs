//! Registration, login, logout and the current user

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{hash_password, verify_password};
use crate::db::PublicUser;
use crate::error::{ApiError, ApiResult};
use crate::server::extract::{AuthUser, LoginForm};
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub user_name: String,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// POST /api/register
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<PublicUser>> {
    let password = request.password;
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| anyhow::anyhow!("Hashing task failed: {}", e))??;

    let email = request.email.as_deref().filter(|e| !e.trim().is_empty());
    let user = state.db().create_user(&request.user_name, email, &hashed)?;

    Ok(Json(PublicUser::from(&user)))
}

/// POST /api/token
pub async fn login(State(state): State<AppState>, form: LoginForm) -> ApiResult<Json<TokenResponse>> {
    let user = state.db().find_user_by_name(&form.username)?;

    let verified = match &user {
        Some(user) => {
            let password = form.password;
            let hashed = user.hashed_password.clone();
            tokio::task::spawn_blocking(move || verify_password(&password, &hashed))
                .await
                .map_err(|e| anyhow::anyhow!("Verification task failed: {}", e))?
        }
        None => false,
    };

    let user = match user {
        Some(user) if verified => user,
        _ => {
            tracing::info!("Failed login for {}", form.username);
            return Err(ApiError::unauthorized("用戶名或密碼錯誤"));
        }
    };

    let issued = state.auth().issue(user.id, &user.user_name)?;
    state.db().update_last_login(user.id)?;
    tracing::info!("User {} logged in", user.user_name);

    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: "bearer".to_string(),
    }))
}

/// POST /api/logout
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> Json<Value> {
    state.auth().logout(&auth.claims);
    Json(json!({ "message": "登出成功" }))
}

/// GET /users/me
pub async fn me(auth: AuthUser) -> Json<PublicUser> {
    Json(PublicUser::from(&auth.user))
}
