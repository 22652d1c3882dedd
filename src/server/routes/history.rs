//! Query history of the current user

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{HistoryPage, QueryRecord};
use crate::error::{ApiError, ApiResult};
use crate::server::extract::AuthUser;
use crate::server::state::AppState;

const RECORD_NOT_FOUND: &str = "記錄不存在或無權存取";

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// GET /api/history?skip=0&limit=10
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<HistoryPage>> {
    let history = state
        .db()
        .list_records(auth.user.id, page.skip, page.limit)?;
    Ok(Json(history))
}

/// GET /api/history/latest
pub async fn latest(State(state): State<AppState>, auth: AuthUser) -> ApiResult<Json<QueryRecord>> {
    state
        .db()
        .latest_record(auth.user.id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("無問答記錄"))
}

/// GET /api/history/:id
pub async fn get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(record_id): Path<i64>,
) -> ApiResult<Json<QueryRecord>> {
    state
        .db()
        .get_record(auth.user.id, record_id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(RECORD_NOT_FOUND))
}

/// DELETE /api/history/:id
pub async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(record_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    if !state.db().delete_record(auth.user.id, record_id)? {
        return Err(ApiError::not_found(RECORD_NOT_FOUND));
    }
    Ok(Json(json!({ "message": "記錄刪除成功" })))
}
