//! Operator debug endpoints over the log buffer and request stats.

use super::{AdminState, ApiError};
use crate::logbuf::{LogCategory, LogLevel};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_limit() -> usize {
    100
}

/// GET /api/debug/logs?limit&level&category
pub async fn logs(
    State(state): State<AdminState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let level = match &query.level {
        Some(s) => Some(
            LogLevel::parse(s)
                .ok_or_else(|| ApiError::BadRequest("Неизвестный уровень логов".to_string()))?,
        ),
        None => None,
    };
    let category = match &query.category {
        Some(s) => Some(
            LogCategory::parse(s)
                .ok_or_else(|| ApiError::BadRequest("Неизвестная категория логов".to_string()))?,
        ),
        None => None,
    };

    let limit = query.limit.min(1_000);
    let entries = state.ctx.logs.read(limit, level, category);
    let total = state.ctx.logs.count(level, category);

    Ok(Json(json!({"logs": entries, "total": total})))
}

/// GET /api/debug/stats
pub async fn stats(State(state): State<AdminState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({
        "requests": state.ctx.stats.snapshot(),
        "uptimeSecs": state.ctx.stats.uptime_secs(),
        "activeBots": state.sup.active_ids().await,
        "multiCommandSessions": state.ctx.registry.len(),
    })))
}
