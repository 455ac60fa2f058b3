//! WebSocket connection management

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::room::Room;
use helpdesk_shared::ServerEvent;

/// Who is on the other end of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participant {
    /// Authenticated staff member
    Agent { user_id: Uuid, name: String },
    /// Anonymous widget visitor
    Visitor { visitor_id: String },
}

impl Participant {
    pub fn agent_id(&self) -> Option<Uuid> {
        match self {
            Self::Agent { user_id, .. } => Some(*user_id),
            Self::Visitor { .. } => None,
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent { .. })
    }
}

/// An active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    pub session_id: Uuid,
    pub participant: Participant,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Rooms this connection has joined
    pub subscriptions: Arc<RwLock<HashSet<Room>>>,
}

impl Connection {
    pub fn new(participant: Participant, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            participant,
            sender,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Err if the connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    pub async fn subscribe(&self, room: Room) {
        self.subscriptions.write().await.insert(room);
        tracing::debug!(session_id = %self.session_id, room = %room, "Subscribed to room");
    }

    pub async fn unsubscribe(&self, room: Room) {
        self.subscriptions.write().await.remove(&room);
        tracing::debug!(session_id = %self.session_id, room = %room, "Unsubscribed from room");
    }

    pub async fn is_subscribed(&self, room: &Room) -> bool {
        self.subscriptions.read().await.contains(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Participant {
        Participant::Agent {
            user_id: Uuid::new_v4(),
            name: "Ada".to_string(),
        }
    }

    #[tokio::test]
    async fn test_connection_subscription() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(agent(), tx);
        let room = Room::Conversation(Uuid::new_v4());

        assert!(!conn.is_subscribed(&room).await);

        conn.subscribe(room).await;
        conn.subscribe(Room::Agents).await;
        assert!(conn.is_subscribed(&room).await);
        assert!(conn.is_subscribed(&Room::Agents).await);

        conn.unsubscribe(room).await;
        assert!(!conn.is_subscribed(&room).await);
    }

    #[test]
    fn test_participant_identity() {
        let visitor = Participant::Visitor {
            visitor_id: "v-123".to_string(),
        };
        assert!(visitor.agent_id().is_none());
        assert!(!visitor.is_agent());
        assert!(agent().agent_id().is_some());
    }
}
