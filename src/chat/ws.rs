use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::debug_handler;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{Identity, TokenVerifier};
use crate::chat::msg::{self, ChatContext};
use crate::chat::registry::{self, ConnId, RoomRegistry};
use crate::users;

#[derive(Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    Path(peer_id): Path<i64>,
    Query(TokenQuery { token }): Query<TokenQuery>,
    State(db_pool): State<SqlitePool>,
    State(verifier): State<TokenVerifier>,
    State(rooms): State<RoomRegistry>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Auth failures resolve to Anonymous here and get rejected after the
    // upgrade, mirroring how the frontend expects the close to arrive.
    let identity = verifier.resolve(token.as_deref(), &db_pool).await;
    ws.on_upgrade(move |socket| handle_socket(socket, identity, peer_id, db_pool, rooms))
}

enum Phase {
    Connecting,
    Joined { room: String, conn: ConnId },
    Closed,
}

/// Per-connection lifecycle: Connecting -> Joined on successful
/// authorization, Connecting/Joined -> Closed otherwise. Closing from
/// Joined leaves the room exactly once; the Drop impl covers early returns.
struct Connection {
    rooms: RoomRegistry,
    phase: Phase,
}

impl Connection {
    fn new(rooms: RoomRegistry) -> Self {
        Self {
            rooms,
            phase: Phase::Connecting,
        }
    }

    fn join(&mut self, room: String, conn: ConnId, tx: mpsc::UnboundedSender<String>) {
        self.rooms.join(&room, conn, tx);
        self.phase = Phase::Joined { room, conn };
    }

    fn close(&mut self) {
        if let Phase::Joined { room, conn } = std::mem::replace(&mut self.phase, Phase::Closed) {
            self.rooms.leave(&room, conn);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn handle_socket(
    socket: WebSocket,
    identity: Identity,
    peer_id: i64,
    db_pool: SqlitePool,
    rooms: RoomRegistry,
) {
    // Authorization boundary. Dropping the socket closes it; no error frame
    // is sent before the close.
    let Identity::Authenticated { id: self_id, display_name } = identity else {
        warn!("closing anonymous connection aimed at user {peer_id}");
        return;
    };

    let peer = match users::lookup_by_id(&db_pool, peer_id).await {
        Ok(Some(peer)) => peer,
        Ok(None) => {
            warn!("user {self_id} tried to chat with nonexistent user {peer_id}");
            return;
        }
        Err(err) => {
            error!("peer lookup failed: {err:#}");
            return;
        }
    };

    let room = registry::room_id(self_id, peer_id);
    let conn = Uuid::now_v7();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let mut connection = Connection::new(rooms.clone());
    connection.join(room.clone(), conn, tx);
    info!("user {self_id} joined room {room}");

    let ctx = ChatContext {
        room,
        sender_id: self_id,
        sender_name: display_name,
        recipient_id: peer.id,
        recipient_name: peer.display_name().to_owned(),
    };

    let (mut sink, mut stream) = socket.split();

    // Broadcasts queue on the channel, so a slow peer never stalls the
    // sender's persist-then-broadcast step.
    let mut forward = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Err(err) = msg::handle_inbound(&db_pool, &rooms, &ctx, &text).await {
                        // Connection stays open; nothing was broadcast.
                        error!("message from user {self_id} not persisted: {:#}", err.0);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut forward => break,
        }
    }

    connection.close();
    forward.abort();
    info!("user {self_id} left room {}", ctx.room);
}
