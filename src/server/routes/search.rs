//! Travel question answering

use axum::{body::Bytes, extract::State, Json};
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::rag::RagError;
use crate::server::extract::AuthUser;
use crate::server::state::AppState;

/// Accepts `{"content": "..."}` or a JSON string holding that object
pub fn parse_query(body: &[u8]) -> anyhow::Result<String> {
    let value: Value = serde_json::from_slice(body)?;
    let object = match value {
        Value::String(inner) => serde_json::from_str::<Value>(&inner)?,
        other => other,
    };

    object
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("'content'"))
}

/// POST /api/search
pub async fn search(
    State(state): State<AppState>,
    auth: AuthUser,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let rag = state.rag();
    if !rag.is_ready() {
        return Err(ApiError::ServiceUnavailable("RAG系統尚未就緒".to_string()));
    }

    let query = parse_query(&body).map_err(ApiError::search)?;
    tracing::info!("User {} asked: {}", auth.user.user_name, query);

    let answer = match rag.process_query(&query).await {
        Ok(answer) => answer,
        Err(RagError::NotReady) => {
            return Err(ApiError::ServiceUnavailable("RAG系統尚未就緒".to_string()))
        }
        Err(RagError::Pipeline(e)) => return Err(ApiError::search(format!("{:#}", e))),
    };

    state
        .db()
        .add_record(auth.user.id, &query, &answer.answer)
        .map_err(|e| ApiError::search(format!("{:#}", e)))?;

    Ok(Json(json!({ "response": answer.answer })))
}
