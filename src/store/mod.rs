//! Embedded SQLite store.
//!
//! One database file holds everything: admin users, bots, knowledge bases,
//! commands, chat history, and settings. Callers see synchronous operations;
//! writer serialization happens behind the internal connection lock.
//!
//! Migrations are idempotent: `CREATE TABLE IF NOT EXISTS` plus column adds
//! guarded by a `PRAGMA table_info` check, so re-opening an old database
//! upgrades it in place.

mod bots;
mod commands;
mod databases;
mod history;
mod settings;
mod users;

pub use bots::{BotInput, BotRow};
pub use commands::{CommandInput, CommandRow};
pub use databases::{DatabaseInput, DatabaseRow};
pub use history::HistoryRow;
pub use settings::SettingRow;
pub use users::UserRow;

use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;

        info!("store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bots (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                token TEXT NOT NULL,
                api_url TEXT NOT NULL DEFAULT '',
                api_key TEXT NOT NULL DEFAULT '',
                ai_model TEXT NOT NULL DEFAULT '',
                system_prompt TEXT,
                database_id TEXT,
                telegram_username TEXT,
                telegram_first_name TEXT,
                telegram_bot_id INTEGER,
                is_active INTEGER NOT NULL DEFAULT 0,
                is_running INTEGER NOT NULL DEFAULT 0,
                memory_enabled INTEGER NOT NULL DEFAULT 0,
                memory_messages_count INTEGER NOT NULL DEFAULT 10,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bots_active_running
                ON bots(is_active, is_running);

            CREATE TABLE IF NOT EXISTS databases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL CHECK(type IN ('text', 'json')),
                description TEXT,
                content TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bot_commands (
                id TEXT PRIMARY KEY,
                bot_id TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                json_code TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_multi_command INTEGER NOT NULL DEFAULT 0,
                parent_multi_command_id TEXT,
                allow_external_commands INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(bot_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_bot_commands_lookup
                ON bot_commands(bot_id, name, is_active);

            CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bot_id TEXT NOT NULL REFERENCES bots(id) ON DELETE CASCADE,
                chat_id TEXT NOT NULL,
                user_message TEXT NOT NULL,
                ai_response TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chat_history_lookup
                ON chat_history(bot_id, chat_id, timestamp DESC);

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        // Columns added after the initial schema shipped.
        add_column_if_missing(&conn, "bots", "memory_enabled", "INTEGER NOT NULL DEFAULT 0")?;
        add_column_if_missing(
            &conn,
            "bots",
            "memory_messages_count",
            "INTEGER NOT NULL DEFAULT 10",
        )?;
        add_column_if_missing(
            &conn,
            "bot_commands",
            "allow_external_commands",
            "INTEGER NOT NULL DEFAULT 0",
        )?;

        Ok(())
    }

    /// First-start seed: one admin user, two example knowledge bases, and the
    /// default support-chat settings. Safe to call on every boot.
    pub fn seed(&self, admin_email: &str, admin_password_hash: &str) -> Result<()> {
        let user_count: i64 = {
            let conn = self.conn.lock();
            conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?
        };

        if user_count == 0 {
            self.insert_user(admin_email, admin_password_hash)?;
            info!("seeded admin user {}", admin_email);
        }

        let db_count: i64 = {
            let conn = self.conn.lock();
            conn.query_row("SELECT COUNT(*) FROM databases", [], |row| row.get(0))?
        };

        if db_count == 0 {
            self.create_database(&DatabaseInput {
                name: "Пример текстовой базы".to_string(),
                db_type: "text".to_string(),
                description: Some("Пример базы знаний в текстовом формате".to_string()),
                content: "Часы работы: 9:00-18:00 по будням.\nАдрес: ул. Примерная, 1."
                    .to_string(),
            })?;
            self.create_database(&DatabaseInput {
                name: "Пример JSON базы".to_string(),
                db_type: "json".to_string(),
                description: Some("Пример базы знаний в формате JSON".to_string()),
                content: r#"{"faq":[{"q":"Как оформить заказ?","a":"Через сайт или по телефону."}]}"#
                    .to_string(),
            })?;
            info!("seeded example knowledge bases");
        }

        for (key, value) in [
            ("support_ai_api_url", "https://api.openai.com/v1"),
            ("support_ai_api_key", ""),
            ("support_ai_model", "gpt-4o-mini"),
            (
                "support_ai_system_prompt",
                "Ты помощник службы поддержки панели управления ботами. Отвечай кратко и по делу.",
            ),
        ] {
            let exists: i64 = {
                let conn = self.conn.lock();
                conn.query_row(
                    "SELECT COUNT(*) FROM settings WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )?
            };
            if exists == 0 {
                self.upsert_setting(key, value)?;
            }
        }

        Ok(())
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect();

    if !existing.iter().any(|c| c == column) {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
            [],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store.migrate().unwrap();
    }

    #[test]
    fn test_seed_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.seed("admin@admin.com", "hash").unwrap();
        store.seed("admin@admin.com", "hash").unwrap();

        let user = store.find_user_by_email("admin@admin.com").unwrap();
        assert!(user.is_some());

        let dbs = store.list_databases().unwrap();
        assert_eq!(dbs.len(), 2);

        let settings = store.all_settings().unwrap();
        assert_eq!(settings.len(), 4);
        assert!(settings.iter().any(|s| s.key == "support_ai_model"));
    }
}
