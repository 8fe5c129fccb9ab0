//! Command CRUD and multi-command context control.

use super::{AdminState, ApiError};
use crate::logbuf::LogCategory;
use crate::store::{CommandInput, CommandRow};
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

fn ensure_bot(state: &AdminState, bot_id: &str) -> Result<(), ApiError> {
    if state
        .ctx
        .store
        .get_bot(bot_id)
        .map_err(ApiError::Internal)?
        .is_none()
    {
        return Err(ApiError::NotFound("Бот не найден".to_string()));
    }
    Ok(())
}

fn owned_command(
    state: &AdminState,
    bot_id: &str,
    cmd_id: &str,
) -> Result<CommandRow, ApiError> {
    let cmd = state
        .ctx
        .store
        .get_command(cmd_id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Команда не найдена".to_string()))?;

    if cmd.bot_id != bot_id {
        return Err(ApiError::NotFound("Команда не найдена".to_string()));
    }
    Ok(cmd)
}

pub async fn list(
    State(state): State<AdminState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Vec<CommandRow>>, ApiError> {
    ensure_bot(&state, &bot_id)?;
    Ok(Json(
        state
            .ctx
            .store
            .list_commands(&bot_id)
            .map_err(ApiError::Internal)?,
    ))
}

pub async fn create(
    State(state): State<AdminState>,
    Path(bot_id): Path<String>,
    Json(input): Json<CommandInput>,
) -> Result<Json<Value>, ApiError> {
    ensure_bot(&state, &bot_id)?;

    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Название команды обязательно".to_string(),
        ));
    }

    // Uniqueness and JSON validation live in the store; both surface as 400.
    let cmd = state
        .ctx
        .store
        .create_command(&bot_id, &input)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.ctx.logs.success(
        LogCategory::Api,
        format!("command '{}' created for bot {}", cmd.name, bot_id),
    );

    Ok(Json(json!({"success": true, "commandId": cmd.id})))
}

pub async fn update(
    State(state): State<AdminState>,
    Path((bot_id, cmd_id)): Path<(String, String)>,
    Json(input): Json<CommandInput>,
) -> Result<Json<Value>, ApiError> {
    owned_command(&state, &bot_id, &cmd_id)?;

    state
        .ctx
        .store
        .update_command(&cmd_id, &input)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(json!({"success": true})))
}

pub async fn remove(
    State(state): State<AdminState>,
    Path((bot_id, cmd_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    owned_command(&state, &bot_id, &cmd_id)?;

    state
        .ctx
        .store
        .delete_command(&cmd_id)
        .map_err(ApiError::Internal)?;

    // Chats pinned to a deleted multi-command fall back to top level.
    state.ctx.registry.clear_command(&bot_id, &cmd_id);

    Ok(Json(json!({"success": true})))
}

/// DELETE /api/bots/{bot_id}/multi-command-context/{cmd_id} — drops every
/// chat out of this multi-command.
pub async fn clear_context(
    State(state): State<AdminState>,
    Path((bot_id, cmd_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    ensure_bot(&state, &bot_id)?;

    let cleared = state.ctx.registry.clear_command(&bot_id, &cmd_id);

    state.ctx.logs.info(
        LogCategory::Bot,
        format!(
            "multi-command context {} cleared for {} chats",
            cmd_id, cleared
        ),
    );

    Ok(Json(json!({"success": true, "clearedCount": cleared})))
}
