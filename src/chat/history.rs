use axum::extract::{Path, State};
use axum::{Json, debug_handler};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::appresult::AppResult;
use crate::auth::AuthUser;
use crate::chat::msg::MessagePayload;
use crate::{db, users};

/// Fetching a conversation doubles as the read receipt: everything the
/// other user sent is marked read before the rows are returned.
#[debug_handler(state = crate::AppState)]
pub async fn history(
    AuthUser(me): AuthUser,
    Path(user_id): Path<i64>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<MessagePayload>>> {
    let Some(other) = users::lookup_by_id(&db_pool, user_id).await? else {
        return Ok(Json(Vec::new()));
    };

    db::mark_read(&db_pool, other.id, me.id).await?;

    let rows = db::conversation_history(&db_pool, me.id, other.id).await?;
    let messages = rows
        .into_iter()
        .map(|message| {
            if message.sender_id == me.id {
                MessagePayload::from_parts(
                    message,
                    me.display_name().to_owned(),
                    other.display_name().to_owned(),
                )
            } else {
                MessagePayload::from_parts(
                    message,
                    other.display_name().to_owned(),
                    me.display_name().to_owned(),
                )
            }
        })
        .collect();

    Ok(Json(messages))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationPartner {
    pub id: i64,
    pub username: String,
    pub full_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LastMessage {
    pub sender: i64,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_read: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub user: ConversationPartner,
    pub last_message: Option<LastMessage>,
    pub unread_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

#[debug_handler(state = crate::AppState)]
pub async fn conversations(
    AuthUser(me): AuthUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(build_conversations(&db_pool, &me).await?))
}

pub(crate) async fn build_conversations(
    db_pool: &SqlitePool,
    me: &users::User,
) -> AppResult<Vec<ConversationSummary>> {
    let mut summaries = Vec::new();
    for partner in db::conversation_partners(db_pool, me.id).await? {
        let last = db::last_message_between(db_pool, me.id, partner.id).await?;
        let unread = db::unread_from(db_pool, partner.id, me.id).await?;

        summaries.push(ConversationSummary {
            timestamp: last.as_ref().map(|m| m.timestamp),
            last_message: last.map(|m| LastMessage {
                sender: m.sender_id,
                content: m.content,
                timestamp: m.timestamp,
                is_read: m.is_read,
            }),
            unread_count: unread,
            user: ConversationPartner {
                id: partner.id,
                username: partner.username.clone(),
                full_name: partner.display_name().to_owned(),
            },
        });
    }

    // Most recently active conversation first.
    summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(summaries)
}

#[derive(Serialize)]
pub struct UnreadCount {
    pub unread_count: i64,
}

#[debug_handler(state = crate::AppState)]
pub async fn unread_count(
    AuthUser(me): AuthUser,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<UnreadCount>> {
    let unread_count = db::unread_count(&db_pool, me.id).await?;
    Ok(Json(UnreadCount { unread_count }))
}
