//! Realtime event protocol
//!
//! Closed set of client-to-server and server-to-client events exchanged over
//! the `/ws` endpoint. Both the API server and the dashboard client use these
//! types, so every variant is handled exhaustively on both ends.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::types::{AgentStatus, Message, MessageMetadata, SenderKind};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Subscribe to a conversation's channel
    JoinConversation { conversation_id: Uuid },

    /// Unsubscribe from a conversation's channel
    LeaveConversation { conversation_id: Uuid },

    /// Subscribe to the shared agents channel (agents only)
    JoinAgentDashboard,

    /// Agent typing burst started or ended
    AgentTyping {
        conversation_id: Uuid,
        is_typing: bool,
    },

    /// Visitor typing burst started or ended
    CustomerTyping {
        conversation_id: Uuid,
        is_typing: bool,
    },

    /// Heartbeat
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected { session_id: Uuid },

    /// A message was added to a conversation (delivered to agents)
    NewMessage {
        conversation_id: Uuid,
        message: MessageEvent,
    },

    /// An agent or AI reply (delivered to the visitor's conversation channel)
    AgentMessage {
        conversation_id: Uuid,
        message: MessageEvent,
    },

    AgentTypingStatus {
        conversation_id: Uuid,
        agent_id: Uuid,
        agent_name: String,
        is_typing: bool,
    },

    CustomerTypingStatus {
        conversation_id: Uuid,
        is_typing: bool,
    },

    /// Agent came online / went away / disconnected
    AgentStatusUpdate {
        agent_id: Uuid,
        status: AgentStatus,
    },

    /// Assignment or archival changed
    ConversationUpdated {
        conversation_id: Uuid,
        assigned_agent_id: Option<Uuid>,
        archived: bool,
    },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },
}

impl ServerEvent {
    /// Short name used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::NewMessage { .. } => "new-message",
            Self::AgentMessage { .. } => "agent-message",
            Self::AgentTypingStatus { .. } => "agent-typing-status",
            Self::CustomerTypingStatus { .. } => "customer-typing-status",
            Self::AgentStatusUpdate { .. } => "agent-status-update",
            Self::ConversationUpdated { .. } => "conversation-updated",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Message payload carried by realtime events.
///
/// `id` is absent for system-relayed copies, in which case receivers
/// de-duplicate on content and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub conversation_id: Uuid,
    pub sender_kind: SenderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Message> for MessageEvent {
    fn from(m: Message) -> Self {
        Self {
            id: Some(m.id),
            conversation_id: m.conversation_id,
            sender_kind: m.sender_kind,
            sender_id: m.sender_id,
            content: m.content,
            metadata: m.metadata,
            created_at: m.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_deserialization() {
        let json = r#"{"type":"join-conversation","conversation_id":"550e8400-e29b-41d4-a716-446655440000"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::JoinConversation { conversation_id } => {
                assert_eq!(
                    conversation_id.to_string(),
                    "550e8400-e29b-41d4-a716-446655440000"
                );
            }
            _ => panic!("Expected JoinConversation event"),
        }

        let event: ClientEvent = serde_json::from_str(r#"{"type":"join-agent-dashboard"}"#).unwrap();
        assert_eq!(event, ClientEvent::JoinAgentDashboard);
    }

    #[test]
    fn test_server_event_serialization() {
        let json = serde_json::to_string(&ServerEvent::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);

        let event = ServerEvent::CustomerTypingStatus {
            conversation_id: Uuid::nil(),
            is_typing: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"customer-typing-status""#));
        assert!(json.contains(r#""is_typing":true"#));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"delete-everything"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_message_event_without_id() {
        let json = r#"{
            "type":"new-message",
            "conversation_id":"550e8400-e29b-41d4-a716-446655440000",
            "message":{
                "conversation_id":"550e8400-e29b-41d4-a716-446655440000",
                "sender_kind":"system",
                "content":"Conversation assigned",
                "created_at":"2025-01-01T10:00:00Z"
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::NewMessage { message, .. } => {
                assert!(message.id.is_none());
                assert_eq!(message.sender_kind, SenderKind::System);
                assert!(!message.metadata.pending_agent);
            }
            other => panic!("Expected NewMessage, got {:?}", other),
        }
    }
}
