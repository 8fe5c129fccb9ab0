//! Admin users.

use super::Store;
use anyhow::Result;
use rusqlite::{params, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get("id")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub fn insert_user(&self, email: &str, password_hash: &str) -> Result<UserRow> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, email, password_hash, now],
        )?;
        drop(conn);

        Ok(self
            .find_user_by_email(email)?
            .expect("user row exists right after insert"))
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM users WHERE email = ?1")?;
        let mut rows = stmt.query_map([email], row_to_user)?;
        Ok(rows.next().transpose()?)
    }
}
