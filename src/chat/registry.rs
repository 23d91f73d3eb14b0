use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub type ConnId = Uuid;

/// Canonical id for the room shared by an unordered pair of users.
/// `room_id(a, b) == room_id(b, a)` for all a, b.
pub fn room_id(a: i64, b: i64) -> String {
    format!("{}_{}", a.min(b), a.max(b))
}

/// Shared membership map: room id -> live connections. Constructor-injected
/// into the socket handlers so tests get isolated instances.
///
/// The lock is never held across an await; fan-out copies the target set out
/// first, then sends.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<HashMap<String, HashMap<ConnId, UnboundedSender<String>>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a room. Re-joining with the same
    /// connection id replaces the previous entry, so membership stays a set.
    pub fn join(&self, room: &str, conn: ConnId, tx: UnboundedSender<String>) {
        let mut rooms = self.rooms.lock().unwrap();
        rooms.entry(room.to_owned()).or_default().insert(conn, tx);
    }

    /// Drop a connection from its room. No-op for connections that never
    /// joined. Empty rooms are removed so the map does not accumulate keys.
    pub fn leave(&self, room: &str, conn: ConnId) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Snapshot of the room's members at call time.
    pub fn broadcast_targets(&self, room: &str) -> Vec<(ConnId, UnboundedSender<String>)> {
        let rooms = self.rooms.lock().unwrap();
        rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .map(|(conn, tx)| (*conn, tx.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn room_id_is_symmetric() {
        assert_eq!(room_id(3, 7), room_id(7, 3));
        assert_eq!(room_id(3, 7), "3_7");
    }

    #[test]
    fn room_id_separates_pairs() {
        assert_ne!(room_id(1, 2), room_id(1, 3));
        assert_ne!(room_id(1, 23), room_id(12, 3));
    }

    #[test]
    fn join_is_idempotent() {
        let registry = RoomRegistry::new();
        let conn = Uuid::now_v7();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.join("3_7", conn, tx.clone());
        registry.join("3_7", conn, tx);
        assert_eq!(registry.broadcast_targets("3_7").len(), 1);
    }

    #[test]
    fn leave_removes_membership() {
        let registry = RoomRegistry::new();
        let conn_a = Uuid::now_v7();
        let conn_b = Uuid::now_v7();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.join("3_7", conn_a, tx.clone());
        registry.join("3_7", conn_b, tx);
        registry.leave("3_7", conn_a);

        let targets = registry.broadcast_targets("3_7");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].0, conn_b);
    }

    #[test]
    fn leave_without_join_is_a_noop() {
        let registry = RoomRegistry::new();
        registry.leave("3_7", Uuid::now_v7());
        assert!(registry.broadcast_targets("3_7").is_empty());
    }

    #[test]
    fn rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.join("3_7", Uuid::now_v7(), tx);
        assert!(registry.broadcast_targets("3_8").is_empty());
    }
}
