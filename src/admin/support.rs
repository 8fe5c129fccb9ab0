//! Support chat endpoint.
//!
//! Reuses the LLM adapter with settings-driven provider credentials and a
//! fixed system prompt. Responds with plain text, or an SSE stream of chunks
//! when the client asks for streaming.

use super::{AdminState, ApiError};
use crate::llm::ChatRequest;
use crate::logbuf::LogCategory;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;

#[derive(Debug, Deserialize)]
pub struct SupportChatRequest {
    pub message: String,
    #[serde(default)]
    pub stream: bool,
}

fn build_request(state: &AdminState, message: &str) -> Result<ChatRequest, ApiError> {
    let setting = |key: &str| -> Result<String, ApiError> {
        Ok(state
            .ctx
            .store
            .get_setting(key)
            .map_err(ApiError::Internal)?
            .unwrap_or_default())
    };

    let api_url = setting("support_ai_api_url")?;
    if api_url.is_empty() {
        return Err(ApiError::BadRequest(
            "AI сервис поддержки не настроен".to_string(),
        ));
    }

    Ok(ChatRequest {
        api_url,
        api_key: setting("support_ai_api_key")?,
        model: setting("support_ai_model")?,
        system_prompt: Some(setting("support_ai_system_prompt")?).filter(|s| !s.is_empty()),
        history: vec![],
        user_message: message.to_string(),
    })
}

/// POST /api/support/chat
pub async fn chat(
    State(state): State<AdminState>,
    Json(body): Json<SupportChatRequest>,
) -> Result<Response, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Сообщение пусто".to_string()));
    }

    let request = build_request(&state, &body.message)?;

    state
        .ctx
        .logs
        .info(LogCategory::Support, "support chat request");

    if body.stream {
        let chunks = state.ctx.llm.chat_stream(request).await;
        let events =
            chunks.map(|chunk| Ok::<_, Infallible>(Event::default().data(chunk)));

        let response = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
        state.ctx.stats.record_request(true);
        return Ok(response);
    }

    let reply = state.ctx.llm.chat(&request).await;
    state.ctx.stats.record_request(true);
    Ok(reply.into_response())
}
