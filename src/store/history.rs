//! Per-chat conversation history.
//!
//! Append-only exchanges; each `(bot, chat)` pair keeps only its newest 100
//! rows, pruned on every append.

use super::Store;
use anyhow::Result;
use rusqlite::{params, Row};
use serde::Serialize;

/// Rows retained per `(bot_id, chat_id)` pair.
pub const MAX_HISTORY_PER_CHAT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub bot_id: String,
    pub chat_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub timestamp: i64,
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get("id")?,
        bot_id: row.get("bot_id")?,
        chat_id: row.get("chat_id")?,
        user_message: row.get("user_message")?,
        ai_response: row.get("ai_response")?,
        timestamp: row.get("timestamp")?,
    })
}

impl Store {
    /// Appends one `(user, ai)` exchange and prunes the pair to the newest
    /// 100 rows.
    pub fn append_exchange(
        &self,
        bot_id: &str,
        chat_id: &str,
        user_message: &str,
        ai_response: &str,
    ) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp();

        let conn = self.conn();
        conn.execute(
            "INSERT INTO chat_history (bot_id, chat_id, user_message, ai_response, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![bot_id, chat_id, user_message, ai_response, timestamp],
        )?;

        conn.execute(
            "DELETE FROM chat_history
             WHERE bot_id = ?1 AND chat_id = ?2 AND id NOT IN (
                 SELECT id FROM chat_history
                 WHERE bot_id = ?1 AND chat_id = ?2
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?3
             )",
            params![bot_id, chat_id, MAX_HISTORY_PER_CHAT as i64],
        )?;

        Ok(())
    }

    /// Newest `limit` rows for a pair, newest first.
    pub fn recent_history(&self, bot_id: &str, chat_id: &str, limit: i64) -> Result<Vec<HistoryRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM chat_history
             WHERE bot_id = ?1 AND chat_id = ?2
             ORDER BY timestamp DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![bot_id, chat_id, limit], row_to_history)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Admin listing over all chats of a bot, newest first.
    pub fn list_history(&self, bot_id: &str, limit: i64, offset: i64) -> Result<Vec<HistoryRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM chat_history
             WHERE bot_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![bot_id, limit, offset], row_to_history)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn history_count(&self, bot_id: &str, chat_id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM chat_history WHERE bot_id = ?1 AND chat_id = ?2",
            params![bot_id, chat_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    pub fn delete_history_entry(&self, bot_id: &str, entry_id: i64) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "DELETE FROM chat_history WHERE bot_id = ?1 AND id = ?2",
            params![bot_id, entry_id],
        )?;
        Ok(changed > 0)
    }

    pub fn clear_history(&self, bot_id: &str) -> Result<usize> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM chat_history WHERE bot_id = ?1", [bot_id])?;
        Ok(deleted)
    }

    /// Message counts grouped by an SQLite `strftime` bucket, for the
    /// dashboard charts. `since` is a unix-seconds lower bound.
    pub fn message_buckets(&self, since: i64, bucket_format: &str) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT strftime(?1, timestamp, 'unixepoch') AS bucket, COUNT(*)
             FROM chat_history
             WHERE timestamp >= ?2
             GROUP BY bucket
             ORDER BY bucket",
        )?;
        let rows = stmt
            .query_map(params![bucket_format, since], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
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
                memory_enabled: true,
                memory_messages_count: 5,
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_append_and_recent_order() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        store.append_exchange(&bot_id, "c1", "hi", "hello").unwrap();
        store
            .append_exchange(&bot_id, "c1", "how are you", "fine")
            .unwrap();

        let recent = store.recent_history(&bot_id, "c1", 10).unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].user_message, "how are you");
        assert_eq!(recent[1].user_message, "hi");
    }

    #[test]
    fn test_prunes_to_100_per_pair() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        for i in 0..150 {
            store
                .append_exchange(&bot_id, "c1", &format!("q{}", i), &format!("a{}", i))
                .unwrap();
        }

        assert_eq!(store.history_count(&bot_id, "c1").unwrap(), 100);

        // The newest rows survive.
        let recent = store.recent_history(&bot_id, "c1", 5).unwrap();
        assert_eq!(recent[0].user_message, "q149");
        assert_eq!(recent[4].user_message, "q145");
    }

    #[test]
    fn test_pairs_pruned_independently() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        for i in 0..110 {
            store
                .append_exchange(&bot_id, "c1", &format!("q{}", i), "a")
                .unwrap();
        }
        store.append_exchange(&bot_id, "c2", "only", "one").unwrap();

        assert_eq!(store.history_count(&bot_id, "c1").unwrap(), 100);
        assert_eq!(store.history_count(&bot_id, "c2").unwrap(), 1);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        store.append_exchange(&bot_id, "c1", "a", "b").unwrap();
        store.append_exchange(&bot_id, "c1", "c", "d").unwrap();

        let rows = store.recent_history(&bot_id, "c1", 10).unwrap();
        assert!(store.delete_history_entry(&bot_id, rows[0].id).unwrap());
        assert!(!store.delete_history_entry(&bot_id, rows[0].id).unwrap());

        assert_eq!(store.clear_history(&bot_id).unwrap(), 1);
        assert_eq!(store.history_count(&bot_id, "c1").unwrap(), 0);
    }

    #[test]
    fn test_message_buckets() {
        let store = Store::open_in_memory().unwrap();
        let bot_id = make_bot(&store);

        store.append_exchange(&bot_id, "c1", "a", "b").unwrap();
        store.append_exchange(&bot_id, "c2", "c", "d").unwrap();

        let buckets = store.message_buckets(0, "%Y-%m-%d").unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].1, 2);
    }
}
