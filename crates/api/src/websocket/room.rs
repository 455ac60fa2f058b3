//! Room management for pub/sub
//!
//! One room per conversation plus a single shared `agents` room for
//! dashboard-wide broadcasts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use helpdesk_shared::ServerEvent;

/// Broadcast channel key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Conversation(Uuid),
    Agents,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Conversation(id) => write!(f, "conversation:{}", id),
            Room::Agents => f.write_str("agents"),
        }
    }
}

/// Manages rooms for broadcasting events
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<Room, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a room; joining twice is a no-op
    pub async fn join(&self, room: Room, conn: Arc<Connection>) {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room).or_default();
        if !members.iter().any(|c| c.session_id == conn.session_id) {
            members.push(Arc::clone(&conn));
        }

        tracing::debug!(
            room = %room,
            session_id = %conn.session_id,
            room_size = members.len(),
            "Connection joined room"
        );
    }

    /// Remove a connection from a room
    pub async fn leave(&self, room: &Room, session_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(conns) = rooms.get_mut(room) {
            conns.retain(|c| c.session_id != *session_id);

            if conns.is_empty() {
                rooms.remove(room);
                tracing::debug!(room = %room, "Removed empty room");
            } else {
                tracing::debug!(
                    room = %room,
                    session_id = %session_id,
                    room_size = conns.len(),
                    "Connection left room"
                );
            }
        }
    }

    /// Broadcast an event to all connections in a room
    ///
    /// Silently ignores send errors (closed connections will be cleaned up)
    pub async fn broadcast(&self, room: &Room, event: ServerEvent) -> usize {
        self.broadcast_except(room, event, None).await
    }

    /// Broadcast to a room, skipping one session (typically the sender).
    ///
    /// Returns the number of connections the event was delivered to.
    pub async fn broadcast_except(
        &self,
        room: &Room,
        event: ServerEvent,
        skip: Option<Uuid>,
    ) -> usize {
        let rooms = self.rooms.read().await;
        let Some(conns) = rooms.get(room) else {
            tracing::trace!(room = %room, event_type = event.kind(), "No subscribers for room");
            return 0;
        };

        let mut success_count = 0;
        let mut failed_count = 0;

        for conn in conns.iter().filter(|c| Some(c.session_id) != skip) {
            match conn.send(event.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        session_id = %conn.session_id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            room = %room,
            event_type = event.kind(),
            recipients = success_count,
            failed = failed_count,
            "Broadcast event to room"
        );

        success_count
    }

    /// Remove a connection from all rooms
    pub async fn remove_connection(&self, session_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        let mut removed_from = 0;

        for conns in rooms.values_mut() {
            let before_len = conns.len();
            conns.retain(|c| c.session_id != *session_id);
            if conns.len() < before_len {
                removed_from += 1;
            }
        }

        rooms.retain(|_, conns| !conns.is_empty());

        if removed_from > 0 {
            tracing::debug!(
                session_id = %session_id,
                room_count = removed_from,
                "Removed connection from rooms"
            );
        }
    }

    pub async fn get_room_size(&self, room: &Room) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map(|v| v.len()).unwrap_or(0)
    }

    pub async fn get_room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
