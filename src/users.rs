use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: String,
}

impl User {
    /// Full name when the profile has one, username otherwise.
    pub fn display_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.username
        } else {
            &self.full_name
        }
    }
}

pub async fn lookup_by_id(db_pool: &SqlitePool, id: i64) -> sqlx::Result<Option<User>> {
    sqlx::query_as("SELECT id, username, full_name FROM users WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}
