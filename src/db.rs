use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;

const SCHEMA: &str = include_str!("../schema.sql");

pub async fn init_schema(db_pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

/// One direct message. Insert-only, except for `is_read` which the
/// history endpoint flips when the recipient fetches the conversation.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub content: String,
    pub timestamp: OffsetDateTime,
    pub is_read: bool,
}

/// Insert a message and return the stored row. The returned row is the
/// durable record; callers must not broadcast anything before this resolves.
pub async fn create_message(
    db_pool: &SqlitePool,
    sender_id: i64,
    recipient_id: i64,
    content: &str,
) -> sqlx::Result<ChatMessage> {
    sqlx::query_as(
        "INSERT INTO messages (sender_id, recipient_id, content, timestamp, is_read) \
         VALUES (?, ?, ?, ?, 0) \
         RETURNING id, sender_id, recipient_id, content, timestamp, is_read",
    )
    .bind(sender_id)
    .bind(recipient_id)
    .bind(content)
    .bind(OffsetDateTime::now_utc())
    .fetch_one(db_pool)
    .await
}

/// All messages between two users, oldest first.
pub async fn conversation_history(
    db_pool: &SqlitePool,
    user_a: i64,
    user_b: i64,
) -> sqlx::Result<Vec<ChatMessage>> {
    sqlx::query_as(
        "SELECT id, sender_id, recipient_id, content, timestamp, is_read FROM messages \
         WHERE (sender_id=? AND recipient_id=?) OR (sender_id=? AND recipient_id=?) \
         ORDER BY timestamp, id",
    )
    .bind(user_a)
    .bind(user_b)
    .bind(user_b)
    .bind(user_a)
    .fetch_all(db_pool)
    .await
}

pub async fn last_message_between(
    db_pool: &SqlitePool,
    user_a: i64,
    user_b: i64,
) -> sqlx::Result<Option<ChatMessage>> {
    sqlx::query_as(
        "SELECT id, sender_id, recipient_id, content, timestamp, is_read FROM messages \
         WHERE (sender_id=? AND recipient_id=?) OR (sender_id=? AND recipient_id=?) \
         ORDER BY timestamp DESC, id DESC LIMIT 1",
    )
    .bind(user_a)
    .bind(user_b)
    .bind(user_b)
    .bind(user_a)
    .fetch_optional(db_pool)
    .await
}

/// Mark everything `from_id` sent to `to_id` as read. Returns rows touched.
pub async fn mark_read(db_pool: &SqlitePool, from_id: i64, to_id: i64) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE messages SET is_read=1 WHERE sender_id=? AND recipient_id=? AND is_read=0",
    )
    .bind(from_id)
    .bind(to_id)
    .execute(db_pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn unread_count(db_pool: &SqlitePool, recipient_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE recipient_id=? AND is_read=0")
        .bind(recipient_id)
        .fetch_one(db_pool)
        .await
}

pub async fn unread_from(db_pool: &SqlitePool, from_id: i64, to_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE sender_id=? AND recipient_id=? AND is_read=0",
    )
    .bind(from_id)
    .bind(to_id)
    .fetch_one(db_pool)
    .await
}

/// Every user the given user has exchanged at least one message with.
pub async fn conversation_partners(
    db_pool: &SqlitePool,
    user_id: i64,
) -> sqlx::Result<Vec<crate::users::User>> {
    sqlx::query_as(
        "SELECT id, username, full_name FROM users WHERE id IN ( \
            SELECT recipient_id FROM messages WHERE sender_id=? \
            UNION \
            SELECT sender_id FROM messages WHERE recipient_id=?)",
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(db_pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        for (id, name) in [(1, "ann"), (2, "ben"), (3, "cia")] {
            sqlx::query("INSERT INTO users (id, username) VALUES (?, ?)")
                .bind(id)
                .bind(name)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn create_message_returns_stored_row() {
        let pool = pool().await;
        let msg = create_message(&pool, 1, 2, "hello").await.unwrap();
        assert_eq!(msg.sender_id, 1);
        assert_eq!(msg.recipient_id, 2);
        assert_eq!(msg.content, "hello");
        assert!(!msg.is_read);

        let next = create_message(&pool, 2, 1, "hi back").await.unwrap();
        assert!(next.id > msg.id);
    }

    #[tokio::test]
    async fn history_covers_both_directions_in_order() {
        let pool = pool().await;
        create_message(&pool, 1, 2, "one").await.unwrap();
        create_message(&pool, 2, 1, "two").await.unwrap();
        create_message(&pool, 1, 3, "unrelated").await.unwrap();

        let history = conversation_history(&pool, 1, 2).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two"]);

        let last = last_message_between(&pool, 2, 1).await.unwrap().unwrap();
        assert_eq!(last.content, "two");
    }

    #[tokio::test]
    async fn mark_read_only_touches_one_direction() {
        let pool = pool().await;
        create_message(&pool, 1, 2, "a").await.unwrap();
        create_message(&pool, 1, 2, "b").await.unwrap();
        create_message(&pool, 2, 1, "c").await.unwrap();

        assert_eq!(unread_count(&pool, 2).await.unwrap(), 2);
        assert_eq!(mark_read(&pool, 1, 2).await.unwrap(), 2);
        assert_eq!(unread_count(&pool, 2).await.unwrap(), 0);

        // the reply 2 -> 1 stays unread
        assert_eq!(unread_from(&pool, 2, 1).await.unwrap(), 1);
        assert_eq!(mark_read(&pool, 1, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn partners_are_deduplicated() {
        let pool = pool().await;
        create_message(&pool, 1, 2, "a").await.unwrap();
        create_message(&pool, 2, 1, "b").await.unwrap();
        create_message(&pool, 3, 1, "c").await.unwrap();

        let mut ids: Vec<_> = conversation_partners(&pool, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        ids.sort();
        assert_eq!(ids, [2, 3]);
    }
}
