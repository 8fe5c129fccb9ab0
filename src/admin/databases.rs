//! Knowledge base CRUD.

use super::{AdminState, ApiError};
use crate::logbuf::LogCategory;
use crate::store::{DatabaseInput, DatabaseRow};
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

fn validate(input: &DatabaseInput) -> Result<(), ApiError> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Название обязательно".to_string()));
    }
    match input.db_type.as_str() {
        "text" => Ok(()),
        "json" => {
            if !input.content.is_empty()
                && serde_json::from_str::<Value>(&input.content).is_err()
            {
                Err(ApiError::BadRequest(
                    "Содержимое не является корректным JSON".to_string(),
                ))
            } else {
                Ok(())
            }
        }
        _ => Err(ApiError::BadRequest(
            "Тип базы должен быть text или json".to_string(),
        )),
    }
}

pub async fn list(State(state): State<AdminState>) -> Result<Json<Vec<DatabaseRow>>, ApiError> {
    Ok(Json(
        state.ctx.store.list_databases().map_err(ApiError::Internal)?,
    ))
}

pub async fn get_one(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<DatabaseRow>, ApiError> {
    state
        .ctx
        .store
        .get_database(&id)
        .map_err(ApiError::Internal)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("База данных не найдена".to_string()))
}

pub async fn create(
    State(state): State<AdminState>,
    Json(input): Json<DatabaseInput>,
) -> Result<Json<Value>, ApiError> {
    validate(&input)?;

    let db = state
        .ctx
        .store
        .create_database(&input)
        .map_err(ApiError::Internal)?;

    state.ctx.logs.success(
        LogCategory::Database,
        format!("knowledge base '{}' created", db.name),
    );

    Ok(Json(json!({"success": true, "databaseId": db.id})))
}

pub async fn update(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(input): Json<DatabaseInput>,
) -> Result<Json<Value>, ApiError> {
    validate(&input)?;

    if !state
        .ctx
        .store
        .update_database(&id, &input)
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::NotFound("База данных не найдена".to_string()));
    }

    Ok(Json(json!({"success": true})))
}

/// Delete is refused while any bot references the base.
pub async fn remove(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let referencing = state
        .ctx
        .store
        .bots_referencing_database(&id)
        .map_err(ApiError::Internal)?;

    if referencing > 0 {
        return Err(ApiError::BadRequest(
            "Нельзя удалить базу данных, пока она используется ботами".to_string(),
        ));
    }

    if !state
        .ctx
        .store
        .delete_database(&id)
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::NotFound("База данных не найдена".to_string()));
    }

    state
        .ctx
        .logs
        .info(LogCategory::Database, format!("knowledge base {} deleted", id));

    Ok(Json(json!({"success": true})))
}
