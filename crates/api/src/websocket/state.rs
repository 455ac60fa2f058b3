//! Global WebSocket state management
//!
//! Maintains global state for all WebSocket connections and rooms, and owns
//! the fan-out rules for events produced by REST handlers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::room::{Room, RoomManager};
use helpdesk_shared::{AgentStatus, Message, MessageEvent, SenderKind, ServerEvent};

/// Global WebSocket state shared across all connections
#[derive(Clone)]
pub struct WebSocketState {
    /// All active connections indexed by session_id
    pub connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,

    pub rooms: Arc<RoomManager>,
}

impl WebSocketState {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
        }
    }

    /// Register a connection.
    ///
    /// An agent's first socket announces them online. The check and the
    /// announcement happen under the connections lock so concurrent sockets
    /// for the same agent produce exactly one status change.
    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.session_id, Arc::clone(&conn));

        tracing::info!(
            session_id = %conn.session_id,
            agent_id = ?conn.participant.agent_id(),
            total_connections = connections.len(),
            "WebSocket connection added"
        );

        if let Some(agent_id) = conn.participant.agent_id() {
            if count_for_agent(&connections, agent_id) == 1 {
                self.publish_agent_status(agent_id, AgentStatus::Online).await;
            }
        }

        conn
    }

    /// Remove a connection and drop it from every room.
    ///
    /// An agent's last socket announces them offline, under the same lock
    /// as [`WebSocketState::add_connection`]. Returns the removed connection,
    /// if it was registered.
    pub async fn remove_connection(&self, session_id: &Uuid) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        let conn = connections.remove(session_id)?;
        self.rooms.remove_connection(session_id).await;

        tracing::info!(
            session_id = %session_id,
            agent_id = ?conn.participant.agent_id(),
            remaining_connections = connections.len(),
            "WebSocket connection removed"
        );

        if let Some(agent_id) = conn.participant.agent_id() {
            if count_for_agent(&connections, agent_id) == 0 {
                self.publish_agent_status(agent_id, AgentStatus::Offline).await;
            }
        }

        Some(conn)
    }

    /// All connections for a specific agent
    pub async fn get_agent_connections(&self, agent_id: &Uuid) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.participant.agent_id() == Some(*agent_id))
            .cloned()
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn get_stats(&self) -> WebSocketStats {
        WebSocketStats {
            active_connections: self.connection_count().await,
            active_rooms: self.rooms.get_room_count().await,
        }
    }

    /// Fan out a newly stored message.
    ///
    /// Agents see every message on the shared channel as `new-message`.
    /// The conversation channel gets `agent-message` for staff and AI replies
    /// and `new-message` for everything else.
    pub async fn publish_message(&self, message: &Message) {
        let conversation_id = message.conversation_id;
        let payload = MessageEvent::from(message.clone());

        self.rooms
            .broadcast(
                &Room::Agents,
                ServerEvent::NewMessage {
                    conversation_id,
                    message: payload.clone(),
                },
            )
            .await;

        let conversation_event = match message.sender_kind {
            SenderKind::Agent | SenderKind::Ai => ServerEvent::AgentMessage {
                conversation_id,
                message: payload,
            },
            SenderKind::Visitor | SenderKind::System => ServerEvent::NewMessage {
                conversation_id,
                message: payload,
            },
        };

        self.rooms
            .broadcast(&Room::Conversation(conversation_id), conversation_event)
            .await;
    }

    /// Announce an assignment or archival change
    pub async fn publish_conversation_update(
        &self,
        conversation_id: Uuid,
        assigned_agent_id: Option<Uuid>,
        archived: bool,
    ) {
        let event = ServerEvent::ConversationUpdated {
            conversation_id,
            assigned_agent_id,
            archived,
        };
        self.rooms.broadcast(&Room::Agents, event.clone()).await;
        self.rooms
            .broadcast(&Room::Conversation(conversation_id), event)
            .await;
    }

    /// Announce an agent status change to the dashboard channel
    pub async fn publish_agent_status(&self, agent_id: Uuid, status: AgentStatus) {
        self.rooms
            .broadcast(&Room::Agents, ServerEvent::AgentStatusUpdate { agent_id, status })
            .await;
    }
}

fn count_for_agent(connections: &HashMap<Uuid, Arc<Connection>>, agent_id: Uuid) -> usize {
    connections
        .values()
        .filter(|c| c.participant.agent_id() == Some(agent_id))
        .count()
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone)]
pub struct WebSocketStats {
    pub active_connections: usize,
    pub active_rooms: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::websocket::connection::Participant;
    use helpdesk_shared::MessageMetadata;
    use time::OffsetDateTime;
    use tokio::sync::mpsc;

    fn agent(user_id: Uuid) -> Participant {
        Participant::Agent {
            user_id,
            name: "Ada".to_string(),
        }
    }

    fn message(conversation_id: Uuid, sender_kind: SenderKind) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_kind,
            sender_id: None,
            content: "hello".to_string(),
            metadata: MessageMetadata::default(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_connection() {
        let state = WebSocketState::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user_id = Uuid::new_v4();

        let conn = Connection::new(agent(user_id), tx);
        let session_id = conn.session_id;

        let added = state.add_connection(conn).await;
        state.rooms.join(Room::Agents, added).await;
        assert_eq!(state.connection_count().await, 1);
        assert_eq!(state.get_agent_connections(&user_id).await.len(), 1);

        assert!(state.remove_connection(&session_id).await.is_some());
        assert_eq!(state.connection_count().await, 0);
        assert_eq!(state.rooms.get_room_count().await, 0);
        assert!(state.remove_connection(&session_id).await.is_none());
    }

    fn status_events(
        rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
        agent_id: Uuid,
    ) -> Vec<AgentStatus> {
        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::AgentStatusUpdate { agent_id: id, status } = event {
                if id == agent_id {
                    statuses.push(status);
                }
            }
        }
        statuses
    }

    #[tokio::test]
    async fn test_concurrent_agent_sockets_announce_status_once() {
        let state = WebSocketState::new();
        let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
        let observer = state
            .add_connection(Connection::new(agent(Uuid::new_v4()), observer_tx))
            .await;
        state.rooms.join(Room::Agents, observer).await;

        let user_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = Connection::new(agent(user_id), tx.clone());
        let second = Connection::new(agent(user_id), tx);
        let (first_id, second_id) = (first.session_id, second.session_id);

        tokio::join!(state.add_connection(first), state.add_connection(second));
        assert_eq!(status_events(&mut observer_rx, user_id), vec![AgentStatus::Online]);

        let (left, right) = tokio::join!(
            state.remove_connection(&first_id),
            state.remove_connection(&second_id),
        );
        assert!(left.is_some() && right.is_some());
        assert_eq!(status_events(&mut observer_rx, user_id), vec![AgentStatus::Offline]);
    }

    #[tokio::test]
    async fn test_visitor_message_fan_out() {
        let state = WebSocketState::new();
        let conversation_id = Uuid::new_v4();

        let (agent_tx, mut agent_rx) = mpsc::unbounded_channel();
        let (visitor_tx, mut visitor_rx) = mpsc::unbounded_channel();
        let agent_conn = state
            .add_connection(Connection::new(agent(Uuid::new_v4()), agent_tx))
            .await;
        let visitor_conn = state
            .add_connection(Connection::new(
                Participant::Visitor {
                    visitor_id: "v-1".to_string(),
                },
                visitor_tx,
            ))
            .await;
        state.rooms.join(Room::Agents, agent_conn).await;
        state
            .rooms
            .join(Room::Conversation(conversation_id), visitor_conn)
            .await;

        state
            .publish_message(&message(conversation_id, SenderKind::Visitor))
            .await;

        assert!(matches!(
            agent_rx.try_recv().unwrap(),
            ServerEvent::NewMessage { .. }
        ));
        assert!(matches!(
            visitor_rx.try_recv().unwrap(),
            ServerEvent::NewMessage { .. }
        ));
    }

    #[tokio::test]
    async fn test_agent_reply_reaches_visitor_as_agent_message() {
        let state = WebSocketState::new();
        let conversation_id = Uuid::new_v4();
        let (visitor_tx, mut visitor_rx) = mpsc::unbounded_channel();
        let visitor_conn = state
            .add_connection(Connection::new(
                Participant::Visitor {
                    visitor_id: "v-1".to_string(),
                },
                visitor_tx,
            ))
            .await;
        state
            .rooms
            .join(Room::Conversation(conversation_id), visitor_conn)
            .await;

        let reply = message(conversation_id, SenderKind::Agent);
        state.publish_message(&reply).await;

        match visitor_rx.try_recv().unwrap() {
            ServerEvent::AgentMessage { message, .. } => assert_eq!(message.id, Some(reply.id)),
            other => panic!("Expected AgentMessage, got {:?}", other),
        }
    }
}
