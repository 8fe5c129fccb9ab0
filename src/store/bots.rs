//! Bot rows: the tenant unit.

use super::Store;
use anyhow::Result;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ceiling on the rolling-memory window.
pub const MAX_MEMORY_MESSAGES: i64 = 50;

#[derive(Debug, Clone, Serialize)]
pub struct BotRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub token: String,
    pub api_url: String,
    pub api_key: String,
    pub ai_model: String,
    pub system_prompt: Option<String>,
    pub database_id: Option<String>,
    pub telegram_username: Option<String>,
    pub telegram_first_name: Option<String>,
    pub telegram_bot_id: Option<i64>,
    pub is_active: bool,
    pub is_running: bool,
    pub memory_enabled: bool,
    pub memory_messages_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl BotRow {
    /// Window size actually used for memory-aware calls.
    pub fn memory_window(&self) -> i64 {
        self.memory_messages_count.clamp(0, MAX_MEMORY_MESSAGES)
    }
}

/// Fields the operator controls. Discovered Telegram identity and the
/// running flag are never taken from input.
#[derive(Debug, Clone, Deserialize)]
pub struct BotInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub token: String,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub ai_model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub memory_enabled: bool,
    #[serde(default = "default_memory_count")]
    pub memory_messages_count: i64,
}

fn default_memory_count() -> i64 {
    10
}

fn row_to_bot(row: &Row<'_>) -> rusqlite::Result<BotRow> {
    Ok(BotRow {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        token: row.get("token")?,
        api_url: row.get("api_url")?,
        api_key: row.get("api_key")?,
        ai_model: row.get("ai_model")?,
        system_prompt: row.get("system_prompt")?,
        database_id: row.get("database_id")?,
        telegram_username: row.get("telegram_username")?,
        telegram_first_name: row.get("telegram_first_name")?,
        telegram_bot_id: row.get("telegram_bot_id")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        is_running: row.get::<_, i64>("is_running")? != 0,
        memory_enabled: row.get::<_, i64>("memory_enabled")? != 0,
        memory_messages_count: row.get("memory_messages_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    pub fn create_bot(&self, input: &BotInput) -> Result<BotRow> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let memory_count = input.memory_messages_count.clamp(0, MAX_MEMORY_MESSAGES);

        let conn = self.conn();
        conn.execute(
            "INSERT INTO bots (id, name, description, token, api_url, api_key, ai_model,
                               system_prompt, database_id, is_active, memory_enabled,
                               memory_messages_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            params![
                id,
                input.name,
                input.description,
                input.token,
                input.api_url,
                input.api_key,
                input.ai_model,
                input.system_prompt,
                input.database_id,
                input.is_active as i64,
                input.memory_enabled as i64,
                memory_count,
                now,
            ],
        )?;
        drop(conn);

        Ok(self
            .get_bot(&id)?
            .expect("bot row exists right after insert"))
    }

    pub fn get_bot(&self, id: &str) -> Result<Option<BotRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM bots WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], row_to_bot)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_bots(&self) -> Result<Vec<BotRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM bots ORDER BY created_at")?;
        let bots = stmt
            .query_map([], row_to_bot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bots)
    }

    /// Full operator-side update. Returns false when the bot does not exist.
    pub fn update_bot(&self, id: &str, input: &BotInput) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let memory_count = input.memory_messages_count.clamp(0, MAX_MEMORY_MESSAGES);

        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE bots SET name = ?1, description = ?2, token = ?3, api_url = ?4,
                             api_key = ?5, ai_model = ?6, system_prompt = ?7,
                             database_id = ?8, is_active = ?9, memory_enabled = ?10,
                             memory_messages_count = ?11, updated_at = ?12
             WHERE id = ?13",
            params![
                input.name,
                input.description,
                input.token,
                input.api_url,
                input.api_key,
                input.ai_model,
                input.system_prompt,
                input.database_id,
                input.is_active as i64,
                input.memory_enabled as i64,
                memory_count,
                now,
                id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn set_running(&self, id: &str, running: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE bots SET is_running = ?1 WHERE id = ?2",
            params![running as i64, id],
        )?;
        Ok(())
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE bots SET is_active = ?1 WHERE id = ?2",
            params![active as i64, id],
        )?;
        Ok(())
    }

    /// Persist identity discovered through `getMe`.
    pub fn set_telegram_info(
        &self,
        id: &str,
        username: Option<&str>,
        first_name: &str,
        telegram_bot_id: i64,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE bots SET telegram_username = ?1, telegram_first_name = ?2,
                             telegram_bot_id = ?3
             WHERE id = ?4",
            params![username, first_name, telegram_bot_id, id],
        )?;
        Ok(())
    }

    /// Deletes the row; commands and history go with it via cascade.
    pub fn delete_bot(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM bots WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    /// Ids whose persisted flag claims a live worker. The reconciler compares
    /// this against the supervisor's truth.
    pub fn ids_marked_running(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM bots WHERE is_running = 1")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn active_bot_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM bots WHERE is_active = 1")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// (total, active, running) for the dashboard.
    pub fn bot_counts(&self) -> Result<(i64, i64, i64)> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(is_active), 0),
                    COALESCE(SUM(is_running), 0)
             FROM bots",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(Into::into)
    }

    pub fn bots_referencing_database(&self, database_id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM bots WHERE database_id = ?1",
            [database_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }
}
