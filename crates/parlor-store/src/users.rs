use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::User;

impl Database {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (user_id, nickname, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user.user_id,
                user.nickname,
                user.password_hash,
                user.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT user_id, nickname, password_hash, created_at
                 FROM users WHERE user_id = ?1",
                params![user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        nickname: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}
