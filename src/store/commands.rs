//! Scripted commands attached to bots.

use super::Store;
use anyhow::{bail, Result};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct CommandRow {
    pub id: String,
    pub bot_id: String,
    pub name: String,
    pub description: Option<String>,
    pub json_code: String,
    pub is_active: bool,
    pub is_multi_command: bool,
    pub parent_multi_command_id: Option<String>,
    pub allow_external_commands: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub json_code: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_multi_command: bool,
    #[serde(default)]
    pub parent_multi_command_id: Option<String>,
    #[serde(default)]
    pub allow_external_commands: bool,
}

fn default_true() -> bool {
    true
}

fn row_to_command(row: &Row<'_>) -> rusqlite::Result<CommandRow> {
    Ok(CommandRow {
        id: row.get("id")?,
        bot_id: row.get("bot_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        json_code: row.get("json_code")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        is_multi_command: row.get::<_, i64>("is_multi_command")? != 0,
        parent_multi_command_id: row.get("parent_multi_command_id")?,
        allow_external_commands: row.get::<_, i64>("allow_external_commands")? != 0,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    /// Creates a command. Name must be unique within the bot and `json_code`
    /// must be well-formed JSON; both are checked here so every write path
    /// gets the same validation.
    pub fn create_command(&self, bot_id: &str, input: &CommandInput) -> Result<CommandRow> {
        if serde_json::from_str::<serde_json::Value>(&input.json_code).is_err() {
            bail!("Некорректный JSON в коде команды");
        }

        let conn = self.conn();
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bot_commands WHERE bot_id = ?1 AND name = ?2",
            params![bot_id, input.name],
            |row| row.get(0),
        )?;
        if exists > 0 {
            bail!("Команда с таким именем уже существует");
        }

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO bot_commands (id, bot_id, name, description, json_code, is_active,
                                       is_multi_command, parent_multi_command_id,
                                       allow_external_commands, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                bot_id,
                input.name,
                input.description,
                input.json_code,
                input.is_active as i64,
                input.is_multi_command as i64,
                input.parent_multi_command_id,
                input.allow_external_commands as i64,
                now,
            ],
        )?;
        drop(conn);

        Ok(self
            .get_command(&id)?
            .expect("command row exists right after insert"))
    }

    pub fn get_command(&self, id: &str) -> Result<Option<CommandRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM bot_commands WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], row_to_command)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_commands(&self, bot_id: &str) -> Result<Vec<CommandRow>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT * FROM bot_commands WHERE bot_id = ?1 ORDER BY created_at")?;
        let rows = stmt
            .query_map([bot_id], row_to_command)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Active commands in creation order; visibility order for intent
    /// matching.
    pub fn active_commands(&self, bot_id: &str) -> Result<Vec<CommandRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM bot_commands WHERE bot_id = ?1 AND is_active = 1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([bot_id], row_to_command)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_command(&self, id: &str, input: &CommandInput) -> Result<bool> {
        if serde_json::from_str::<serde_json::Value>(&input.json_code).is_err() {
            bail!("Некорректный JSON в коде команды");
        }

        let conn = self.conn();
        let clash: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bot_commands c
             WHERE c.name = ?1 AND c.id != ?2
               AND c.bot_id = (SELECT bot_id FROM bot_commands WHERE id = ?2)",
            params![input.name, id],
            |row| row.get(0),
        )?;
        if clash > 0 {
            bail!("Команда с таким именем уже существует");
        }

        let changed = conn.execute(
            "UPDATE bot_commands SET name = ?1, description = ?2, json_code = ?3,
                                     is_active = ?4, is_multi_command = ?5,
                                     parent_multi_command_id = ?6,
                                     allow_external_commands = ?7
             WHERE id = ?8",
            params![
                input.name,
                input.description,
                input.json_code,
                input.is_active as i64,
                input.is_multi_command as i64,
                input.parent_multi_command_id,
                input.allow_external_commands as i64,
                id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_command(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM bot_commands WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BotInput;

    fn make_bot(store: &Store) -> String {
        store
            .create_bot(&BotInput {
                name: "bot".to_string(),
                description: None,
                token: "t".to_string(),
                api_url: String::new(),
                api_key: String::new(),
                ai_model: String::new(),
                system_prompt: None,
                database_id: None,
                is_active: true,
                memory_enabled: false,
                memory_messages_count: 0,
            })
            .unwrap()
            .id
    }

    fn menu_input(name: &str) -> CommandInput {
        CommandInput {
            name: name.to_string(),
            description: Some("открывает меню".to_string()),
            json_code: r#"{"type":"menu","text":"Меню","buttons":[[{"text":"A","callback_data":"a"}]]}"#
                .to_string(),
            is_active: true,
            is_multi_command: false,
            parent_multi_command_id: None,
            allow_external_commands: false,
        }
    }

    #[test]
    fn test_create_and_list() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        store.create_command(&bot_id, &menu_input("open_menu")).unwrap();
        store.create_command(&bot_id, &menu_input("help")).unwrap();

        let all = store.list_commands(&bot_id).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "open_menu");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        store.create_command(&bot_id, &menu_input("dup")).unwrap();
        let err = store.create_command(&bot_id, &menu_input("dup")).unwrap_err();
        assert!(err.to_string().contains("уже существует"));
    }

    #[test]
    fn test_same_name_across_bots_allowed() {
        let store = Store::open_in_memory().unwrap();
        let a = make_bot(&store);
        let b = make_bot(&store);

        store.create_command(&a, &menu_input("shared")).unwrap();
        store.create_command(&b, &menu_input("shared")).unwrap();
    }

    #[test]
    fn test_malformed_json_rejected() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        let mut input = menu_input("broken");
        input.json_code = "{not json".to_string();
        assert!(store.create_command(&bot_id, &input).is_err());
    }

    #[test]
    fn test_active_commands_skips_disabled() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        store.create_command(&bot_id, &menu_input("on")).unwrap();
        let mut off = menu_input("off");
        off.is_active = false;
        store.create_command(&bot_id, &off).unwrap();

        let active = store.active_commands(&bot_id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "on");
    }

    #[test]
    fn test_update_rename_clash_rejected() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        store.create_command(&bot_id, &menu_input("first")).unwrap();
        let second = store.create_command(&bot_id, &menu_input("second")).unwrap();

        let mut rename = menu_input("first");
        assert!(store.update_command(&second.id, &rename).is_err());

        rename.name = "third".to_string();
        assert!(store.update_command(&second.id, &rename).unwrap());
    }
}
