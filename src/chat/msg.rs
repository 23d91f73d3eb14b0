use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::appresult::AppResult;
use crate::chat::registry::RoomRegistry;
use crate::db::{self, ChatMessage};

/// What a joined connection knows about itself; fixed for its lifetime.
pub struct ChatContext {
    pub room: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub recipient_id: i64,
    pub recipient_name: String,
}

#[derive(Deserialize)]
struct InboundFrame {
    message: String,
}

/// The serialized message sent to clients, with display names denormalized
/// in so the frontend does not have to resolve ids.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: i64,
    pub sender: i64,
    pub recipient: i64,
    pub sender_name: String,
    pub recipient_name: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_read: bool,
}

impl MessagePayload {
    pub fn from_parts(message: ChatMessage, sender_name: String, recipient_name: String) -> Self {
        Self {
            id: message.id,
            sender: message.sender_id,
            recipient: message.recipient_id,
            sender_name,
            recipient_name,
            content: message.content,
            timestamp: message.timestamp,
            is_read: message.is_read,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct OutboundFrame {
    pub r#type: String,
    pub message: MessagePayload,
}

/// Persist an inbound chat frame, then fan it out to the room.
///
/// Unparsable frames and blank messages are dropped without an error; the
/// sender gets no feedback. A persistence error aborts before any frame goes
/// out. An unreachable target is skipped so the rest of the room still
/// receives the message.
pub async fn handle_inbound(
    db_pool: &SqlitePool,
    rooms: &RoomRegistry,
    ctx: &ChatContext,
    raw: &str,
) -> AppResult<()> {
    let Ok(frame) = serde_json::from_str::<InboundFrame>(raw) else {
        debug!("dropping unparsable frame in room {}", ctx.room);
        return Ok(());
    };
    let content = frame.message.trim();
    if content.is_empty() {
        debug!("dropping blank message in room {}", ctx.room);
        return Ok(());
    }

    let message = db::create_message(db_pool, ctx.sender_id, ctx.recipient_id, content).await?;

    let payload = MessagePayload::from_parts(
        message,
        ctx.sender_name.clone(),
        ctx.recipient_name.clone(),
    );
    let text = serde_json::to_string(&OutboundFrame {
        r#type: "chat_message".to_owned(),
        message: payload,
    })?;

    // Sender included: its own frame doubles as the delivery confirmation.
    for (conn, tx) in rooms.broadcast_targets(&ctx.room) {
        if tx.send(text.clone()).is_err() {
            warn!("skipping unreachable connection {conn} in room {}", ctx.room);
        }
    }

    Ok(())
}
