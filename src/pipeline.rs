//! Per-message orchestration.
//!
//! Every incoming update re-reads the bot row from the store instead of
//! trusting the snapshot captured at worker start, which is what makes hot
//! reload work without an invalidation bus. History is written only after
//! the LLM reply is produced so the `(user, ai)` pairing holds under
//! concurrent chats.

use crate::commands;
use crate::llm::{compose_system_prompt, ChatRequest};
use crate::logbuf::LogCategory;
use crate::state::AppContext;
use crate::store::{BotRow, CommandRow, HistoryRow};
use crate::supervisor::Supervisor;
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::warn;

pub const NON_TEXT_MSG: &str = "Извините, я работаю только с текстовыми сообщениями.";
pub const PROCESSING_ERROR_MSG: &str =
    "Извините, произошла ошибка при обработке вашего сообщения.";

const MAX_TELEGRAM_MESSAGE: usize = 4_000;

/// Entry point for a worker's message updates.
pub async fn handle_message(
    ctx: &Arc<AppContext>,
    sup: &Supervisor,
    bot: &Bot,
    bot_id: &str,
    msg: &Message,
) {
    let chat = msg.chat.id;
    match process_message(ctx, sup, bot, bot_id, msg).await {
        Ok(handled) => {
            if handled {
                ctx.stats.record_request(true);
            }
        }
        Err(e) => {
            ctx.stats.record_request(false);
            ctx.logs.append(
                crate::logbuf::LogLevel::Error,
                LogCategory::Bot,
                format!("message handling failed for bot {}", bot_id),
                Some(e.to_string()),
            );
            if let Err(send_err) = bot.send_message(chat, PROCESSING_ERROR_MSG).await {
                warn!("failed to deliver error reply: {}", send_err);
            }
        }
    }
}

/// Returns false when the message was dropped before producing a reply.
async fn process_message(
    ctx: &Arc<AppContext>,
    sup: &Supervisor,
    bot: &Bot,
    bot_id: &str,
    msg: &Message,
) -> Result<bool> {
    // Fresh row every time; the worker never caches config.
    let Some(bot_row) = ctx.store.get_bot(bot_id)? else {
        ctx.logs.warning(
            LogCategory::Bot,
            format!("message for unknown bot {}, dropped", bot_id),
        );
        return Ok(false);
    };

    if !bot_row.is_running || !sup.is_worker_active(bot_id).await {
        ctx.logs.warning(
            LogCategory::Bot,
            format!("bot {} is not running, message dropped", bot_row.name),
        );
        return Ok(false);
    }

    let chat = msg.chat.id;
    let Some(text) = msg.text() else {
        bot.send_message(chat, NON_TEXT_MSG).await?;
        return Ok(true);
    };

    let chat_key = chat.0.to_string();
    let active_multi = resolve_active_multi(ctx, &bot_row.id, &chat_key)?;
    let all_active = ctx.store.active_commands(&bot_row.id)?;
    let visible = commands::visible_commands(&all_active, active_multi.as_ref());

    if let Some(matched) = commands::classify_intent(ctx, &bot_row, text, &visible).await {
        commands::run_matched_command(bot, ctx, &bot_row, matched, chat, text).await?;
        return Ok(true);
    }

    let reply = memory_aware_chat(ctx, &bot_row, &chat_key, text).await?;
    send_long_message(bot, chat, &reply).await?;
    ctx.store
        .append_exchange(&bot_row.id, &chat_key, text, &reply)?;

    Ok(true)
}

/// Callback-query path: no intent probe, exact name match on the callback
/// data, edit in place. The query is answered first so the client spinner
/// clears regardless of what happens next.
pub async fn handle_callback(
    ctx: &Arc<AppContext>,
    sup: &Supervisor,
    bot: &Bot,
    bot_id: &str,
    query: &CallbackQuery,
) {
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        warn!("failed to answer callback query: {}", e);
    }

    if let Err(e) = process_callback(ctx, sup, bot, bot_id, query).await {
        ctx.stats.record_request(false);
        ctx.logs.append(
            crate::logbuf::LogLevel::Error,
            LogCategory::Bot,
            format!("callback handling failed for bot {}", bot_id),
            Some(e.to_string()),
        );
        if let Some(message) = &query.message {
            let _ = bot
                .send_message(message.chat().id, commands::COMMAND_FAILED_MSG)
                .await;
        }
    }
}

async fn process_callback(
    ctx: &Arc<AppContext>,
    sup: &Supervisor,
    bot: &Bot,
    bot_id: &str,
    query: &CallbackQuery,
) -> Result<()> {
    let Some(bot_row) = ctx.store.get_bot(bot_id)? else {
        return Ok(());
    };

    if !bot_row.is_running || !sup.is_worker_active(bot_id).await {
        ctx.logs.warning(
            LogCategory::Bot,
            format!("bot {} is not running, callback dropped", bot_row.name),
        );
        return Ok(());
    }

    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    let Some(message) = &query.message else {
        return Ok(());
    };
    let chat = message.chat().id;
    let chat_key = chat.0.to_string();

    let active_multi = resolve_active_multi(ctx, &bot_row.id, &chat_key)?;
    let all_active = ctx.store.active_commands(&bot_row.id)?;
    let visible = commands::visible_commands(&all_active, active_multi.as_ref());

    let Some(matched) = visible.iter().find(|c| c.name == data).copied() else {
        ctx.logs.info(
            LogCategory::Bot,
            format!("callback '{}' matched no visible command", data),
        );
        return Ok(());
    };

    commands::execute_command(bot, ctx, &bot_row, matched, chat, Some(message.id())).await?;
    ctx.stats.record_request(true);
    Ok(())
}

/// Resolves the registry entry to a command row, clearing the entry when the
/// command has been deleted since it was activated.
fn resolve_active_multi(
    ctx: &AppContext,
    bot_id: &str,
    chat_key: &str,
) -> Result<Option<CommandRow>> {
    let Some(command_id) = ctx.registry.get(bot_id, chat_key) else {
        return Ok(None);
    };

    match ctx.store.get_command(&command_id)? {
        Some(cmd) => Ok(Some(cmd)),
        None => {
            ctx.registry.remove(bot_id, chat_key);
            Ok(None)
        }
    }
}

/// LLM call with the rolling history window when memory is enabled.
async fn memory_aware_chat(
    ctx: &AppContext,
    bot_row: &BotRow,
    chat_key: &str,
    text: &str,
) -> Result<String> {
    let history = if bot_row.memory_enabled {
        let rows = ctx
            .store
            .recent_history(&bot_row.id, chat_key, bot_row.memory_window())?;
        history_to_pairs(rows)
    } else {
        vec![]
    };

    let database = match &bot_row.database_id {
        Some(id) => ctx.store.get_database(id)?,
        None => None,
    };

    let reply = ctx
        .llm
        .chat(&ChatRequest {
            api_url: bot_row.api_url.clone(),
            api_key: bot_row.api_key.clone(),
            model: bot_row.ai_model.clone(),
            system_prompt: compose_system_prompt(bot_row.system_prompt.as_deref(), database.as_ref()),
            history,
            user_message: text.to_string(),
        })
        .await;

    Ok(reply)
}

/// Newest-first store rows into chronological `(user, assistant)` pairs.
fn history_to_pairs(rows: Vec<HistoryRow>) -> Vec<(String, String)> {
    rows.into_iter()
        .rev()
        .map(|row| (row.user_message, row.ai_response))
        .collect()
}

/// Telegram caps message length; split long replies on char boundaries.
pub async fn send_long_message(bot: &Bot, chat: ChatId, text: &str) -> Result<()> {
    if text.is_empty() {
        bot.send_message(chat, "(пустой ответ)").await?;
        return Ok(());
    }

    for chunk in split_chunks(text, MAX_TELEGRAM_MESSAGE) {
        bot.send_message(chat, chunk).await?;
    }
    Ok(())
}

fn split_chunks(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            chunks.push(remaining);
            break;
        }
        // Cut at the last char boundary whose end fits within the cap. A
        // first char wider than the cap is taken whole so the loop advances.
        let split_at = remaining
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .take_while(|end| *end <= max_bytes)
            .last()
            .unwrap_or_else(|| {
                remaining
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(remaining.len())
            });
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        remaining = rest;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_row(id: i64, user: &str, ai: &str) -> HistoryRow {
        HistoryRow {
            id,
            bot_id: "b1".to_string(),
            chat_id: "c1".to_string(),
            user_message: user.to_string(),
            ai_response: ai.to_string(),
            timestamp: id,
        }
    }

    #[test]
    fn test_history_to_pairs_reverses_to_chronological() {
        // Store returns newest first.
        let rows = vec![
            history_row(2, "how are you", "fine"),
            history_row(1, "hi", "hello"),
        ];

        let pairs = history_to_pairs(rows);
        assert_eq!(
            pairs,
            vec![
                ("hi".to_string(), "hello".to_string()),
                ("how are you".to_string(), "fine".to_string()),
            ]
        );
    }

    #[test]
    fn test_split_chunks_short_text() {
        assert_eq!(split_chunks("привет", 4_000), vec!["привет"]);
    }

    #[test]
    fn test_split_chunks_respects_char_boundaries() {
        // Cyrillic is two bytes per char; an odd byte limit must not split
        // inside a character, and no chunk may exceed the limit.
        let text = "аб".repeat(10);
        let chunks = split_chunks(&text, 5);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0], "аб");
        assert_eq!(chunks[0].len(), 4);
        for chunk in &chunks {
            assert!(chunk.len() <= 5);
            assert!(!chunk.is_empty());
        }
        assert_eq!(chunks.concat(), text);
    }
}
