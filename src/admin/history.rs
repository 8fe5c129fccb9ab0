//! Chat history read/delete endpoints.

use super::{AdminState, ApiError};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default, rename = "chatId")]
    pub chat_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list(
    State(state): State<AdminState>,
    Path(bot_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.clamp(1, 500);

    let rows = match &query.chat_id {
        Some(chat_id) => state
            .ctx
            .store
            .recent_history(&bot_id, chat_id, limit)
            .map_err(ApiError::Internal)?,
        None => state
            .ctx
            .store
            .list_history(&bot_id, limit, query.offset)
            .map_err(ApiError::Internal)?,
    };

    Ok(Json(json!({"success": true, "history": rows})))
}

pub async fn remove(
    State(state): State<AdminState>,
    Path((bot_id, entry_id)): Path<(String, i64)>,
) -> Result<Json<Value>, ApiError> {
    if !state
        .ctx
        .store
        .delete_history_entry(&bot_id, entry_id)
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::NotFound("Запись не найдена".to_string()));
    }

    Ok(Json(json!({"success": true})))
}

pub async fn clear(
    State(state): State<AdminState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .ctx
        .store
        .clear_history(&bot_id)
        .map_err(ApiError::Internal)?;

    Ok(Json(json!({"success": true, "deleted": deleted})))
}
