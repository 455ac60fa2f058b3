//! Message intake for visitors and agents
//!
//! Visitor messages are stored as waiting on an agent and, depending on the
//! AI mode, trigger a background reply request. Agent replies consume any
//! pending suggestion and record exactly one attribution row.

use helpdesk_shared::{AiMode, Message, MessageMetadata, ResponseAttribution, SenderKind, SuggestionType};
use uuid::Uuid;

use crate::ai::AiClient;
use crate::auth::AuthUser;
use crate::conversations::{self, NewMessage};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const MAX_MESSAGE_CHARS: usize = 5000;

/// Trim and bound message content
pub fn validate_content(content: &str) -> ApiResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation("Message content is required".to_string()));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::Validation(format!(
            "Message content must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

/// Attribution stored with an agent reply.
///
/// Missing attribution means the agent wrote from scratch. Using a
/// suggestion verbatim or edited implies one was offered.
pub fn resolve_attribution(
    claimed: Option<ResponseAttribution>,
    suggestion_pending: bool,
) -> ResponseAttribution {
    match claimed {
        Some(mut attribution) => {
            attribution.suggestion_offered = attribution.suggestion_offered
                || suggestion_pending
                || attribution.suggestion_type != SuggestionType::FromScratch;
            attribution
        }
        None => ResponseAttribution {
            suggestion_type: SuggestionType::FromScratch,
            suggestion_offered: suggestion_pending,
            template_id: None,
        },
    }
}

/// Store a visitor message, fan it out and kick off the AI collaborator
pub async fn accept_visitor_message(
    state: &AppState,
    conversation_id: Uuid,
    content: &str,
) -> ApiResult<Message> {
    let content = validate_content(content)?;

    let message = conversations::insert_message(
        &state.pool,
        NewMessage {
            conversation_id,
            sender_kind: SenderKind::Visitor,
            sender_id: None,
            content,
            metadata: MessageMetadata::pending_agent(),
        },
    )
    .await?;

    state.ws_state.publish_message(&message).await;
    request_ai_reply(state, conversation_id).await;

    Ok(message)
}

/// Ask the AI collaborator for a reply in the background
async fn request_ai_reply(state: &AppState, conversation_id: Uuid) {
    let mode = state.config.ai_mode;
    if mode == AiMode::Off {
        return;
    }
    let Some(client) = state.ai_client.clone() else {
        return;
    };

    let generation = state.suggestions.generation(conversation_id).await;
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) =
            generate_and_deliver(&state, &client, conversation_id, mode, generation).await
        {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %e,
                "AI reply unavailable"
            );
        }
    });
}

async fn generate_and_deliver(
    state: &AppState,
    client: &AiClient,
    conversation_id: Uuid,
    mode: AiMode,
    generation: u64,
) -> anyhow::Result<()> {
    let transcript = conversations::list_messages(&state.pool, conversation_id).await?;
    let reply = client.generate_reply(conversation_id, &transcript).await?;

    match mode {
        AiMode::Hitl => {
            state
                .suggestions
                .put_if_current(conversation_id, generation, reply)
                .await;
        }
        AiMode::Autopilot => {
            let message = conversations::insert_message(
                &state.pool,
                NewMessage {
                    conversation_id,
                    sender_kind: SenderKind::Ai,
                    sender_id: None,
                    content: reply,
                    metadata: MessageMetadata::default(),
                },
            )
            .await?;
            state.ws_state.publish_message(&message).await;
            tracing::info!(conversation_id = %conversation_id, "Autopilot reply sent");
        }
        AiMode::Off => {}
    }

    Ok(())
}

/// Store an agent reply with its attribution
pub async fn accept_agent_reply(
    state: &AppState,
    agent: &AuthUser,
    conversation_id: Uuid,
    content: &str,
    claimed: Option<ResponseAttribution>,
) -> ApiResult<Message> {
    let content = validate_content(content)?;

    let conversation = conversations::find(&state.pool, conversation_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if conversation.archived {
        return Err(ApiError::BadRequest("Conversation has ended".to_string()));
    }

    // Any agent reply retires the pending suggestion
    let suggestion = state.suggestions.take(conversation_id).await;
    let attribution = resolve_attribution(claimed, suggestion.is_some());

    let message = conversations::insert_message(
        &state.pool,
        NewMessage {
            conversation_id,
            sender_kind: SenderKind::Agent,
            sender_id: Some(agent.user_id),
            content,
            metadata: MessageMetadata::attributed(attribution.clone()),
        },
    )
    .await?;

    if let Err(e) =
        conversations::record_statistic(&state.pool, &message, agent.user_id, &attribution).await
    {
        tracing::error!(message_id = %message.id, error = ?e, "Failed to record message statistic");
    }
    if let Err(e) =
        conversations::mark_seen(&state.pool, agent.user_id, conversation_id, message.created_at)
            .await
    {
        tracing::warn!(conversation_id = %conversation_id, error = ?e, "Failed to mark conversation seen");
    }

    state.ws_state.publish_message(&message).await;

    tracing::info!(
        conversation_id = %conversation_id,
        agent_id = %agent.user_id,
        suggestion_type = attribution.suggestion_type.as_str(),
        "Agent reply sent"
    );

    Ok(message)
}
