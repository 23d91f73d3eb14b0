mod history;
mod msg;
mod registry;
mod ws;

pub use msg::{ChatContext, MessagePayload, OutboundFrame, handle_inbound};
pub use registry::{ConnId, RoomRegistry, room_id};

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws/chat/{peer_id}", get(ws::chat_ws))
        .route("/messages/{user_id}", get(history::history))
        .route("/messages/unread/count", get(history::unread_count))
        .route("/conversations", get(history::conversations))
}
