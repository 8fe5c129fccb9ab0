//! Command engine: visibility rules, LLM intent classification, and
//! execution of scripted actions.
//!
//! A command's `json_code` drives what gets sent: an inline-keyboard menu, a
//! reply keyboard, a plain message, or entry into a multi-command context
//! that narrows which commands the chat can see afterwards.

use crate::state::AppContext;
use crate::store::{BotRow, CommandRow};
use anyhow::Result;
use serde_json::Value;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, MessageId,
};
use tracing::{info, warn};

use crate::llm::ChatRequest;
use crate::logbuf::LogCategory;

/// Fixed system prompt of the intent probe.
pub const INTENT_SYSTEM_PROMPT: &str =
    "Ты помощник для определения команд. Отвечай кратко и точно.";

/// System prompt of the conversational lead-in sent before a scripted action.
pub const PRE_REPLY_SYSTEM_PROMPT: &str =
    "Ты дружелюбный ассистент. Подтверди запрос пользователя одним или двумя предложениями. \
     Не перечисляй пункты меню и кнопки.";

pub const COMMAND_FAILED_MSG: &str = "Ошибка выполнения команды.";

const DEFAULT_WELCOME: &str = "Выберите действие:";

/// Pause between the natural lead-in and the scripted UI.
const PRE_REPLY_DELAY: Duration = Duration::from_millis(500);

// ===== Visibility =====

/// Commands visible to a chat, in stored (visibility) order.
///
/// With no active multi-command everything active is visible, including
/// multi-commands themselves. Inside multi-command `M`, nested commands of
/// `M` are visible; top-level commands only when `M` allows external
/// commands.
pub fn visible_commands<'a>(
    commands: &'a [CommandRow],
    active_multi: Option<&CommandRow>,
) -> Vec<&'a CommandRow> {
    match active_multi {
        None => commands.iter().collect(),
        Some(m) => commands
            .iter()
            .filter(|c| {
                let nested = c.parent_multi_command_id.as_deref() == Some(m.id.as_str());
                let top_level = c.parent_multi_command_id.is_none();
                nested || (m.allow_external_commands && top_level)
            })
            .collect(),
    }
}

// ===== Intent classification =====

pub fn build_intent_prompt(user_text: &str, visible: &[&CommandRow]) -> String {
    let mut listing = String::new();
    for cmd in visible {
        listing.push_str(&format!(
            "- {}: {}\n",
            cmd.name,
            cmd.description.as_deref().unwrap_or("")
        ));
    }

    format!(
        "Пользователь написал: \"{}\"\n\nДоступные команды:\n{}\n\
         Если сообщение пользователя является запросом одной из этих команд, \
         ответь только названием команды. Если нет, ответь НЕТ.",
        user_text, listing
    )
}

/// Matches the probe response against the visible set. `НЕТ` anywhere in the
/// response vetoes a match; otherwise the first visible command whose name
/// appears case-insensitively wins.
pub fn match_intent<'a>(response: &str, visible: &[&'a CommandRow]) -> Option<&'a CommandRow> {
    if response.to_uppercase().contains("НЕТ") {
        return None;
    }

    let lower = response.to_lowercase();
    visible
        .iter()
        .find(|cmd| lower.contains(&cmd.name.to_lowercase()))
        .copied()
}

/// Runs the intent probe against the bot's own LLM settings.
pub async fn classify_intent<'a>(
    ctx: &AppContext,
    bot_row: &BotRow,
    user_text: &str,
    visible: &[&'a CommandRow],
) -> Option<&'a CommandRow> {
    if visible.is_empty() {
        return None;
    }

    let response = ctx
        .llm
        .chat(&ChatRequest {
            api_url: bot_row.api_url.clone(),
            api_key: bot_row.api_key.clone(),
            model: bot_row.ai_model.clone(),
            system_prompt: Some(INTENT_SYSTEM_PROMPT.to_string()),
            history: vec![],
            user_message: build_intent_prompt(user_text, visible),
        })
        .await;

    match_intent(&response, visible)
}

// ===== Scripted actions =====

#[derive(Debug, Clone)]
pub struct ButtonSpec {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone)]
pub enum CommandAction {
    Menu {
        text: String,
        buttons: Vec<Vec<ButtonSpec>>,
    },
    Message {
        text: String,
    },
    Keyboard {
        rows: Vec<Vec<String>>,
        one_time: bool,
    },
    MultiCommand {
        welcome: Option<String>,
    },
    Other {
        text: String,
    },
}

/// Best-effort interpretation of `json_code`. Write-time validation only
/// guarantees well-formed JSON, so shapes are read leniently.
pub fn parse_action(cmd: &CommandRow) -> CommandAction {
    let code: Value = serde_json::from_str(&cmd.json_code).unwrap_or(Value::Null);
    let action_type = code["type"].as_str().unwrap_or("");

    match action_type {
        "menu" => CommandAction::Menu {
            text: code["text"]
                .as_str()
                .unwrap_or(cmd.name.as_str())
                .to_string(),
            buttons: parse_inline_buttons(&code["buttons"]),
        },
        "message" => CommandAction::Message {
            text: code["text"].as_str().unwrap_or("").to_string(),
        },
        "keyboard" => CommandAction::Keyboard {
            rows: parse_keyboard_rows(&code["buttons"]),
            one_time: code["one_time"].as_bool().unwrap_or(false),
        },
        "multi_command" => CommandAction::MultiCommand {
            welcome: code["welcome_message"].as_str().map(String::from),
        },
        _ => {
            let text = match code["text"].as_str() {
                Some(t) => t.to_string(),
                None => serde_json::to_string_pretty(&code).unwrap_or_default(),
            };
            CommandAction::Other { text }
        }
    }
}

fn parse_button(value: &Value) -> Option<ButtonSpec> {
    let text = value["text"].as_str()?.to_string();
    let callback_data = value["callback_data"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| text.clone());
    Some(ButtonSpec {
        text,
        callback_data,
    })
}

/// Accepts either rows of buttons or a flat list, one button per row.
fn parse_inline_buttons(value: &Value) -> Vec<Vec<ButtonSpec>> {
    let Some(items) = value.as_array() else {
        return vec![];
    };

    items
        .iter()
        .filter_map(|item| {
            if let Some(row) = item.as_array() {
                let buttons: Vec<ButtonSpec> = row.iter().filter_map(parse_button).collect();
                if buttons.is_empty() {
                    None
                } else {
                    Some(buttons)
                }
            } else {
                parse_button(item).map(|b| vec![b])
            }
        })
        .collect()
}

fn parse_keyboard_rows(value: &Value) -> Vec<Vec<String>> {
    let Some(items) = value.as_array() else {
        return vec![];
    };

    let label = |v: &Value| -> Option<String> {
        v.as_str()
            .map(String::from)
            .or_else(|| v["text"].as_str().map(String::from))
    };

    items
        .iter()
        .filter_map(|item| {
            if let Some(row) = item.as_array() {
                let labels: Vec<String> = row.iter().filter_map(label).collect();
                if labels.is_empty() {
                    None
                } else {
                    Some(labels)
                }
            } else {
                label(item).map(|l| vec![l])
            }
        })
        .collect()
}

pub fn menu_markup(buttons: &[Vec<ButtonSpec>]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(buttons.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.text.clone(), b.callback_data.clone()))
            .collect::<Vec<_>>()
    }))
}

pub fn reply_keyboard(rows: &[Vec<String>], one_time: bool) -> KeyboardMarkup {
    let markup = KeyboardMarkup::new(
        rows.iter()
            .map(|row| row.iter().map(KeyboardButton::new).collect::<Vec<_>>()),
    )
    .resize_keyboard();
    if one_time {
        markup.one_time_keyboard()
    } else {
        markup
    }
}

// ===== Execution =====

/// Welcome text of a multi-command: explicit welcome, else description, else
/// a default.
fn multi_welcome(cmd: &CommandRow, welcome: Option<String>) -> String {
    welcome
        .or_else(|| cmd.description.clone())
        .unwrap_or_else(|| DEFAULT_WELCOME.to_string())
}

/// Text-path entry: conversational lead-in, short pause, then the scripted
/// action. Multi-commands skip the lead-in.
pub async fn run_matched_command(
    bot: &Bot,
    ctx: &AppContext,
    bot_row: &BotRow,
    cmd: &CommandRow,
    chat: ChatId,
    user_text: &str,
) -> Result<()> {
    if !cmd.is_multi_command {
        let lead_in = ctx
            .llm
            .chat(&ChatRequest {
                api_url: bot_row.api_url.clone(),
                api_key: bot_row.api_key.clone(),
                model: bot_row.ai_model.clone(),
                system_prompt: Some(PRE_REPLY_SYSTEM_PROMPT.to_string()),
                history: vec![],
                user_message: user_text.to_string(),
            })
            .await;

        bot.send_message(chat, lead_in).await?;
        tokio::time::sleep(PRE_REPLY_DELAY).await;
    }

    execute_command(bot, ctx, bot_row, cmd, chat, None).await
}

/// Executes a command, optionally editing an existing message in place
/// (callback path).
pub async fn execute_command(
    bot: &Bot,
    ctx: &AppContext,
    bot_row: &BotRow,
    cmd: &CommandRow,
    chat: ChatId,
    edit_message: Option<MessageId>,
) -> Result<()> {
    match parse_action(cmd) {
        CommandAction::MultiCommand { welcome } => {
            ctx.registry
                .set(&bot_row.id, &chat.0.to_string(), &cmd.id);
            ctx.logs.info(
                LogCategory::Bot,
                format!("multi-command '{}' activated in chat {}", cmd.name, chat.0),
            );
            let text = multi_welcome(cmd, welcome);
            send_or_edit(bot, chat, edit_message, &text, None, &ctx.logs).await
        }
        CommandAction::Menu { text, buttons } => {
            let markup = menu_markup(&buttons);
            send_or_edit(bot, chat, edit_message, &text, Some(markup), &ctx.logs).await
        }
        CommandAction::Keyboard { rows, one_time } => {
            // Reply keyboards cannot be attached via edit.
            let markup = reply_keyboard(&rows, one_time);
            let text = cmd
                .description
                .clone()
                .unwrap_or_else(|| DEFAULT_WELCOME.to_string());
            bot.send_message(chat, text).reply_markup(markup).await?;
            Ok(())
        }
        CommandAction::Message { text } => {
            send_or_edit(bot, chat, edit_message, &text, None, &ctx.logs).await
        }
        CommandAction::Other { text } => {
            send_or_edit(bot, chat, edit_message, &text, None, &ctx.logs).await
        }
    }
}

/// Edit in place when a message id is given; fall back to sending when the
/// original is gone or uneditable, and treat "not modified" as success.
async fn send_or_edit(
    bot: &Bot,
    chat: ChatId,
    edit_message: Option<MessageId>,
    text: &str,
    markup: Option<InlineKeyboardMarkup>,
    logs: &crate::logbuf::LogBuffer,
) -> Result<()> {
    use teloxide::{ApiError, RequestError};

    if let Some(message_id) = edit_message {
        let edit = bot.edit_message_text(chat, message_id, text);
        let result = match markup.clone() {
            Some(m) => edit.reply_markup(m).await,
            None => edit.await,
        };

        match result {
            Ok(_) => return Ok(()),
            Err(RequestError::Api(ApiError::MessageNotModified)) => {
                logs.info(
                    LogCategory::Telegram,
                    format!("edit skipped in chat {}: content unchanged", chat.0),
                );
                return Ok(());
            }
            Err(RequestError::Api(ApiError::MessageToEditNotFound))
            | Err(RequestError::Api(ApiError::MessageCantBeEdited)) => {
                warn!("edit target gone in chat {}, sending new message", chat.0);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let send = bot.send_message(chat, text);
    match markup {
        Some(m) => {
            send.reply_markup(m).await?;
        }
        None => {
            send.await?;
        }
    }
    info!("command reply sent to chat {}", chat.0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(
        id: &str,
        name: &str,
        is_multi: bool,
        parent: Option<&str>,
        allow_external: bool,
    ) -> CommandRow {
        CommandRow {
            id: id.to_string(),
            bot_id: "b1".to_string(),
            name: name.to_string(),
            description: Some(format!("описание {}", name)),
            json_code: r#"{"type":"message","text":"ок"}"#.to_string(),
            is_active: true,
            is_multi_command: is_multi,
            parent_multi_command_id: parent.map(String::from),
            allow_external_commands: allow_external,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_visibility_without_context() {
        let commands = vec![
            cmd("1", "menu_mc", true, None, false),
            cmd("2", "inner", false, Some("1"), false),
            cmd("3", "other", false, None, false),
        ];

        let visible = visible_commands(&commands, None);
        assert_eq!(visible.len(), 3);
    }

    #[test]
    fn test_visibility_external_disallowed() {
        let commands = vec![
            cmd("1", "menu_mc", true, None, false),
            cmd("2", "inner", false, Some("1"), false),
            cmd("3", "other", false, None, false),
        ];
        let multi = cmd("1", "menu_mc", true, None, false);

        let visible = visible_commands(&commands, Some(&multi));
        let names: Vec<&str> = visible.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["inner"]);
    }

    #[test]
    fn test_visibility_external_allowed() {
        let commands = vec![
            cmd("1", "menu_mc", true, None, true),
            cmd("2", "inner", false, Some("1"), false),
            cmd("3", "other", false, None, false),
            cmd("4", "foreign", false, Some("9"), false),
        ];
        let multi = cmd("1", "menu_mc", true, None, true);

        let visible = visible_commands(&commands, Some(&multi));
        let names: Vec<&str> = visible.iter().map(|c| c.name.as_str()).collect();
        // Nested plus top-level; children of a different multi stay hidden.
        assert_eq!(names, vec!["menu_mc", "inner", "other"]);
    }

    #[test]
    fn test_intent_prompt_lists_commands() {
        let a = cmd("1", "open_menu", false, None, false);
        let b = cmd("2", "help", false, None, false);
        let visible = vec![&a, &b];

        let prompt = build_intent_prompt("покажи меню", &visible);
        assert!(prompt.contains("open_menu"));
        assert!(prompt.contains("описание help"));
        assert!(prompt.contains("покажи меню"));
        assert!(prompt.contains("НЕТ"));
    }

    #[test]
    fn test_match_intent_case_insensitive() {
        let a = cmd("1", "open_menu", false, None, false);
        let visible = vec![&a];

        assert!(match_intent("OPEN_MENU", &visible).is_some());
        assert!(match_intent("команда open_menu подходит", &visible).is_some());
        assert!(match_intent("ничего похожего", &visible).is_none());
    }

    #[test]
    fn test_match_intent_net_veto() {
        let a = cmd("1", "open_menu", false, None, false);
        let visible = vec![&a];

        assert!(match_intent("НЕТ", &visible).is_none());
        assert!(match_intent("нет, open_menu не подходит", &visible).is_none());
    }

    #[test]
    fn test_match_intent_first_in_order_wins() {
        let a = cmd("1", "menu", false, None, false);
        let b = cmd("2", "menu_full", false, None, false);
        let visible = vec![&a, &b];

        let matched = match_intent("menu_full", &visible).unwrap();
        // "menu" appears inside "menu_full" and comes first in order.
        assert_eq!(matched.name, "menu");
    }

    #[test]
    fn test_parse_menu_action() {
        let mut c = cmd("1", "m", false, None, false);
        c.json_code = r#"{"type":"menu","text":"Главное меню","buttons":[[{"text":"A","callback_data":"a"},{"text":"B","callback_data":"b"}]]}"#.to_string();

        match parse_action(&c) {
            CommandAction::Menu { text, buttons } => {
                assert_eq!(text, "Главное меню");
                assert_eq!(buttons.len(), 1);
                assert_eq!(buttons[0].len(), 2);
                assert_eq!(buttons[0][1].callback_data, "b");
            }
            other => panic!("expected Menu, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_menu_flat_buttons() {
        let mut c = cmd("1", "m", false, None, false);
        c.json_code =
            r#"{"type":"menu","text":"t","buttons":[{"text":"A","callback_data":"a"},{"text":"B"}]}"#
                .to_string();

        match parse_action(&c) {
            CommandAction::Menu { buttons, .. } => {
                assert_eq!(buttons.len(), 2);
                // Missing callback_data falls back to the label.
                assert_eq!(buttons[1][0].callback_data, "B");
            }
            other => panic!("expected Menu, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_keyboard_action() {
        let mut c = cmd("1", "k", false, None, false);
        c.json_code =
            r#"{"type":"keyboard","buttons":[["Да","Нет"],["Отмена"]],"one_time":true}"#.to_string();

        match parse_action(&c) {
            CommandAction::Keyboard { rows, one_time } => {
                assert_eq!(rows, vec![vec!["Да", "Нет"], vec!["Отмена"]]);
                assert!(one_time);
            }
            other => panic!("expected Keyboard, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_multi_command_action() {
        let mut c = cmd("1", "mc", true, None, false);
        c.json_code = r#"{"type":"multi_command","welcome_message":"Добро пожаловать"}"#.to_string();

        match parse_action(&c) {
            CommandAction::MultiCommand { welcome } => {
                assert_eq!(welcome.as_deref(), Some("Добро пожаловать"));
            }
            other => panic!("expected MultiCommand, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_type_uses_text_or_pretty_json() {
        let mut c = cmd("1", "x", false, None, false);
        c.json_code = r#"{"type":"custom","text":"прямой текст"}"#.to_string();
        match parse_action(&c) {
            CommandAction::Other { text } => assert_eq!(text, "прямой текст"),
            other => panic!("expected Other, got {:?}", other),
        }

        c.json_code = r#"{"type":"custom","payload":1}"#.to_string();
        match parse_action(&c) {
            CommandAction::Other { text } => assert!(text.contains("\"payload\": 1")),
            other => panic!("expected Other, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_welcome_fallbacks() {
        let c = cmd("1", "mc", true, None, false);
        assert_eq!(
            multi_welcome(&c, Some("привет".to_string())),
            "привет"
        );
        assert_eq!(multi_welcome(&c, None), "описание mc");

        let mut bare = c.clone();
        bare.description = None;
        assert_eq!(multi_welcome(&bare, None), DEFAULT_WELCOME);
    }

    #[test]
    fn test_menu_markup_shape() {
        let buttons = vec![vec![
            ButtonSpec {
                text: "A".to_string(),
                callback_data: "a".to_string(),
            },
            ButtonSpec {
                text: "B".to_string(),
                callback_data: "b".to_string(),
            },
        ]];

        let markup = menu_markup(&buttons);
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[0][0].text, "A");
    }
}
