//! Bot CRUD and control endpoints.

use super::{AdminState, ApiError};
use crate::logbuf::LogCategory;
use crate::store::{BotInput, BotRow};
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

/// GET /api/bots — list with the live flag reconciled on read.
pub async fn list(State(state): State<AdminState>) -> Result<Json<Vec<BotRow>>, ApiError> {
    let mut bots = state.ctx.store.list_bots().map_err(ApiError::Internal)?;

    for bot in &mut bots {
        let live = state.sup.is_worker_active(&bot.id).await;
        if bot.is_running != live {
            state
                .ctx
                .store
                .set_running(&bot.id, live)
                .map_err(ApiError::Internal)?;
            bot.is_running = live;
        }
    }

    Ok(Json(bots))
}

fn validate(input: &BotInput) -> Result<(), ApiError> {
    if input.name.trim().is_empty() || input.token.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Название и токен обязательны".to_string(),
        ));
    }
    Ok(())
}

/// POST /api/bots
pub async fn create(
    State(state): State<AdminState>,
    Json(input): Json<BotInput>,
) -> Result<Json<Value>, ApiError> {
    validate(&input)?;

    let bot = state
        .ctx
        .store
        .create_bot(&input)
        .map_err(ApiError::Internal)?;

    state
        .ctx
        .logs
        .success(LogCategory::Api, format!("bot '{}' created", bot.name));

    Ok(Json(json!({"success": true, "botId": bot.id})))
}

/// PUT /api/bots/{id} — hot reload unless the token changed while running.
pub async fn update(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(input): Json<BotInput>,
) -> Result<Json<Value>, ApiError> {
    validate(&input)?;

    if state
        .ctx
        .store
        .get_bot(&id)
        .map_err(ApiError::Internal)?
        .is_none()
    {
        return Err(ApiError::NotFound("Бот не найден".to_string()));
    }

    let restarted = state
        .sup
        .update_config(&id, &input)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.ctx.logs.info(
        LogCategory::Api,
        format!(
            "bot {} updated{}",
            id,
            if restarted { ", worker restarted" } else { "" }
        ),
    );

    Ok(Json(json!({"success": true})))
}

/// POST /api/bots/{id}/toggle
pub async fn toggle(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state
        .ctx
        .store
        .get_bot(&id)
        .map_err(ApiError::Internal)?
        .is_none()
    {
        return Err(ApiError::NotFound("Бот не найден".to_string()));
    }

    let is_running = state
        .sup
        .toggle(&id)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // Operator intent follows the toggle.
    state
        .ctx
        .store
        .set_active(&id, is_running)
        .map_err(ApiError::Internal)?;

    Ok(Json(json!({"success": true, "isRunning": is_running})))
}

/// POST /api/bots/{id}/refresh-info
pub async fn refresh_info(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state
        .ctx
        .store
        .get_bot(&id)
        .map_err(ApiError::Internal)?
        .is_none()
    {
        return Err(ApiError::NotFound("Бот не найден".to_string()));
    }

    let info = state
        .sup
        .refresh_info(&id)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Не удалось получить данные бота: {}", e)))?;

    Ok(Json(json!({"success": true, "botInfo": info})))
}

/// DELETE /api/bots/{id}
pub async fn remove(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .sup
        .delete(&id)
        .await
        .map_err(ApiError::Internal)?;

    if !deleted {
        return Err(ApiError::NotFound("Бот не найден".to_string()));
    }

    state
        .ctx
        .logs
        .info(LogCategory::Api, format!("bot {} deleted", id));

    Ok(Json(json!({"success": true})))
}
