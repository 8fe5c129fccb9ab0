//! Settings endpoints (`support_ai_*` and friends).

use super::{AdminState, ApiError};
use crate::logbuf::LogCategory;
use crate::store::SettingRow;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

pub async fn list(State(state): State<AdminState>) -> Result<Json<Vec<SettingRow>>, ApiError> {
    Ok(Json(
        state.ctx.store.all_settings().map_err(ApiError::Internal)?,
    ))
}

pub async fn update(
    State(state): State<AdminState>,
    Json(settings): Json<Vec<SettingRow>>,
) -> Result<Json<Value>, ApiError> {
    for setting in &settings {
        if setting.key.trim().is_empty() {
            return Err(ApiError::BadRequest("Ключ настройки пуст".to_string()));
        }
        state
            .ctx
            .store
            .upsert_setting(&setting.key, &setting.value)
            .map_err(ApiError::Internal)?;
    }

    state.ctx.logs.info(
        LogCategory::Settings,
        format!("{} settings updated", settings.len()),
    );

    Ok(Json(json!({"success": true})))
}
