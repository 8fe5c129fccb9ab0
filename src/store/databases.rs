//! Knowledge bases injected into LLM system prompts.

use super::Store;
use anyhow::Result;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseRow {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: String,
    pub description: Option<String>,
    pub content: String,
    pub size: usize,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseInput {
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: String,
}

fn row_to_database(row: &Row<'_>) -> rusqlite::Result<DatabaseRow> {
    let content: String = row.get("content")?;
    Ok(DatabaseRow {
        id: row.get("id")?,
        name: row.get("name")?,
        db_type: row.get("type")?,
        description: row.get("description")?,
        size: content.len(),
        content,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    pub fn create_database(&self, input: &DatabaseInput) -> Result<DatabaseRow> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let conn = self.conn();
        conn.execute(
            "INSERT INTO databases (id, name, type, description, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id,
                input.name,
                input.db_type,
                input.description,
                input.content,
                now
            ],
        )?;
        drop(conn);

        Ok(self
            .get_database(&id)?
            .expect("database row exists right after insert"))
    }

    pub fn get_database(&self, id: &str) -> Result<Option<DatabaseRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM databases WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], row_to_database)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_databases(&self) -> Result<Vec<DatabaseRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM databases ORDER BY created_at")?;
        let rows = stmt
            .query_map([], row_to_database)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_database(&self, id: &str, input: &DatabaseInput) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE databases SET name = ?1, type = ?2, description = ?3, content = ?4,
                                  updated_at = ?5
             WHERE id = ?6",
            params![
                input.name,
                input.db_type,
                input.description,
                input.content,
                now,
                id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_database(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn.execute("DELETE FROM databases WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BotInput;

    #[test]
    fn test_crud_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let db = store
            .create_database(&DatabaseInput {
                name: "FAQ".to_string(),
                db_type: "text".to_string(),
                description: None,
                content: "Часы работы: 9-18".to_string(),
            })
            .unwrap();

        assert_eq!(db.size, db.content.len());

        let loaded = store.get_database(&db.id).unwrap().unwrap();
        assert_eq!(loaded.name, "FAQ");
        assert_eq!(loaded.db_type, "text");

        store
            .update_database(
                &db.id,
                &DatabaseInput {
                    name: "FAQ v2".to_string(),
                    db_type: "json".to_string(),
                    description: Some("обновлено".to_string()),
                    content: "{}".to_string(),
                },
            )
            .unwrap();

        let loaded = store.get_database(&db.id).unwrap().unwrap();
        assert_eq!(loaded.name, "FAQ v2");
        assert_eq!(loaded.db_type, "json");
        assert_eq!(loaded.size, 2);

        assert!(store.delete_database(&db.id).unwrap());
        assert!(store.get_database(&db.id).unwrap().is_none());
    }

    #[test]
    fn test_reference_count() {
        let store = Store::open_in_memory().unwrap();
        let db = store
            .create_database(&DatabaseInput {
                name: "kb".to_string(),
                db_type: "text".to_string(),
                description: None,
                content: String::new(),
            })
            .unwrap();

        assert_eq!(store.bots_referencing_database(&db.id).unwrap(), 0);

        store
            .create_bot(&BotInput {
                name: "bot".to_string(),
                description: None,
                token: "t".to_string(),
                api_url: String::new(),
                api_key: String::new(),
                ai_model: String::new(),
                system_prompt: None,
                database_id: Some(db.id.clone()),
                is_active: false,
                memory_enabled: false,
                memory_messages_count: 0,
            })
            .unwrap();

        assert_eq!(store.bots_referencing_database(&db.id).unwrap(), 1);
    }
}
