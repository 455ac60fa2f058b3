//! WebSocket handler for Axum
//!
//! Handles WebSocket connections, authentication, and event routing.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use helpdesk_shared::{ClientEvent, ServerEvent};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::conversations;
use crate::state::AppState;

use super::{
    connection::{Connection, Participant},
    room::Room,
    state::WebSocketState,
};

/// Agents pass `token`, widget visitors pass `visitor_id`
#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
    visitor_id: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
/// Authenticates via query parameters instead of middleware Extension
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Result<Response, StatusCode> {
    let participant = resolve_participant(&app_state, params).await?;

    tracing::info!(
        agent_id = ?participant.agent_id(),
        "WebSocket connection upgrade requested"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, participant, app_state)))
}

async fn resolve_participant(
    app_state: &AppState,
    params: WebSocketQuery,
) -> Result<Participant, StatusCode> {
    if let Some(token) = params.token {
        let user = app_state
            .auth_state()
            .authenticate(&token)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "WebSocket auth failed");
                e.status_and_code().0
            })?;

        if user.password_status.blocked {
            tracing::info!(user_id = %user.user_id, "WebSocket refused: password expired");
            return Err(StatusCode::FORBIDDEN);
        }

        return Ok(Participant::Agent {
            user_id: user.user_id,
            name: user.name,
        });
    }

    match params.visitor_id {
        Some(visitor_id) if conversations::valid_visitor_id(&visitor_id) => {
            Ok(Participant::Visitor { visitor_id })
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, participant: Participant, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let ws_state = app_state.ws_state.clone();
    let conn = ws_state.add_connection(Connection::new(participant, tx)).await;
    let session_id = conn.session_id;

    let _ = conn.send(ServerEvent::Connected { session_id });

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let Ok(msg) = msg else { break };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_client_event(event, Arc::clone(&conn), &ws_state, &app_state).await;
                }
                Err(e) => {
                    tracing::warn!(error = ?e, session_id = %session_id, "Failed to parse client event");
                    let _ = conn.send(ServerEvent::Error {
                        message: "Invalid event format".to_string(),
                    });
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }

    tracing::info!(session_id = %session_id, "WebSocket connection closing");
    ws_state.remove_connection(&session_id).await;

    send_task.abort();
}

/// Role check applied before an event is handled
pub fn permits(participant: &Participant, event: &ClientEvent) -> bool {
    match (participant, event) {
        (
            Participant::Visitor { .. },
            ClientEvent::JoinAgentDashboard | ClientEvent::AgentTyping { .. },
        ) => false,
        (Participant::Agent { .. }, ClientEvent::CustomerTyping { .. }) => false,
        _ => true,
    }
}

async fn can_join(
    app_state: &AppState,
    participant: &Participant,
    conversation_id: Uuid,
) -> Result<bool, sqlx::Error> {
    match participant {
        Participant::Agent { .. } => conversations::exists(&app_state.pool, conversation_id).await,
        Participant::Visitor { visitor_id } => {
            conversations::visitor_owns(&app_state.pool, conversation_id, visitor_id).await
        }
    }
}

/// Handle client event
async fn handle_client_event(
    event: ClientEvent,
    conn: Arc<Connection>,
    ws_state: &WebSocketState,
    app_state: &AppState,
) {
    if !permits(&conn.participant, &event) {
        tracing::warn!(session_id = %conn.session_id, event = ?event, "Client event not permitted");
        let _ = conn.send(ServerEvent::Error {
            message: "Not permitted".to_string(),
        });
        return;
    }

    match event {
        ClientEvent::JoinConversation { conversation_id } => {
            match can_join(app_state, &conn.participant, conversation_id).await {
                Ok(true) => {
                    let room = Room::Conversation(conversation_id);
                    conn.subscribe(room).await;
                    ws_state.rooms.join(room, Arc::clone(&conn)).await;
                }
                Ok(false) => {
                    let _ = conn.send(ServerEvent::Error {
                        message: "Access denied to conversation".to_string(),
                    });
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to verify conversation access");
                    let _ = conn.send(ServerEvent::Error {
                        message: "Failed to verify access".to_string(),
                    });
                }
            }
        }

        ClientEvent::LeaveConversation { conversation_id } => {
            let room = Room::Conversation(conversation_id);
            conn.unsubscribe(room).await;
            ws_state.rooms.leave(&room, &conn.session_id).await;
        }

        ClientEvent::JoinAgentDashboard => {
            conn.subscribe(Room::Agents).await;
            ws_state.rooms.join(Room::Agents, Arc::clone(&conn)).await;
        }

        ClientEvent::AgentTyping {
            conversation_id,
            is_typing,
        } => {
            let Participant::Agent { user_id, name } = &conn.participant else {
                return;
            };
            ws_state
                .rooms
                .broadcast_except(
                    &Room::Conversation(conversation_id),
                    ServerEvent::AgentTypingStatus {
                        conversation_id,
                        agent_id: *user_id,
                        agent_name: name.clone(),
                        is_typing,
                    },
                    Some(conn.session_id),
                )
                .await;
        }

        ClientEvent::CustomerTyping {
            conversation_id,
            is_typing,
        } => {
            let room = Room::Conversation(conversation_id);
            if !conn.is_subscribed(&room).await {
                let _ = conn.send(ServerEvent::Error {
                    message: "Join the conversation first".to_string(),
                });
                return;
            }

            let event = ServerEvent::CustomerTypingStatus {
                conversation_id,
                is_typing,
            };
            ws_state
                .rooms
                .broadcast_except(&room, event.clone(), Some(conn.session_id))
                .await;
            ws_state.rooms.broadcast(&Room::Agents, event).await;
        }

        ClientEvent::Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }
}
