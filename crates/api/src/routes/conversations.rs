//! Conversation routes for agents, plus the AI collaborator callback

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use helpdesk_shared::{ApiEnvelope, Conversation, Message, PendingSuggestion};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{account, AuthUser},
    conversations::{self, ConversationRecord},
    error::{ApiError, ApiResult},
    messaging,
    state::AppState,
};

/// Header carrying the shared secret on AI collaborator callbacks
pub const AI_SERVICE_KEY_HEADER: &str = "x-ai-service-key";

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub visitor_id: String,
    pub category_id: Option<Uuid>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub conversation_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignRequest {
    /// Defaults to the caller
    pub agent_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkSeenRequest {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub seen_at: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionCallback {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationState {
    pub conversation_id: Uuid,
    pub assigned_agent_id: Option<Uuid>,
    pub archived: bool,
}

impl From<ConversationRecord> for ConversationState {
    fn from(record: ConversationRecord) -> Self {
        Self {
            conversation_id: record.id,
            assigned_agent_id: record.assigned_agent_id,
            archived: record.archived,
        }
    }
}

/// Queue for the calling agent
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListConversationsQuery>,
) -> ApiResult<Json<ApiEnvelope<Vec<Conversation>>>> {
    let list = conversations::list_for_agent(&state.pool, auth_user.user_id, query.archived).await?;
    Ok(Json(ApiEnvelope::ok(list)))
}

/// Visitor opens a conversation, optionally with a first message
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<Json<ApiEnvelope<CreateConversationResponse>>> {
    if !conversations::valid_visitor_id(&req.visitor_id) {
        return Err(ApiError::Validation("Invalid visitor id".to_string()));
    }
    if !state
        .rate_limiter
        .check_visitor_message(&req.visitor_id)
        .await
        .allowed
    {
        return Err(ApiError::RateLimited);
    }
    if let Some(content) = &req.message {
        messaging::validate_content(content)?;
    }

    let record = conversations::create(&state.pool, &req.visitor_id, req.category_id).await?;

    let message = match &req.message {
        Some(content) => Some(messaging::accept_visitor_message(&state, record.id, content).await?),
        None => None,
    };

    Ok(Json(ApiEnvelope::ok(CreateConversationResponse {
        conversation_id: record.id,
        message,
    })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ApiEnvelope<Vec<Message>>>> {
    if !conversations::exists(&state.pool, conversation_id).await? {
        return Err(ApiError::NotFound);
    }
    let messages = conversations::list_messages(&state.pool, conversation_id).await?;
    Ok(Json(ApiEnvelope::ok(messages)))
}

async fn announce(state: &AppState, record: ConversationRecord) -> Json<ApiEnvelope<ConversationState>> {
    state
        .ws_state
        .publish_conversation_update(record.id, record.assigned_agent_id, record.archived)
        .await;
    Json(ApiEnvelope::ok(ConversationState::from(record)))
}

/// Assign to the caller, or to another agent when the caller is an admin
pub async fn assign(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
    body: Option<Json<AssignRequest>>,
) -> ApiResult<Json<ApiEnvelope<ConversationState>>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let agent_id = req.agent_id.unwrap_or(auth_user.user_id);

    if agent_id != auth_user.user_id {
        auth_user.require_admin()?;
        let target = account::find_by_id(&state.pool, agent_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| ApiError::Validation("Unknown or inactive agent".to_string()))?;
        tracing::debug!(agent_id = %target.id, "Assigning on behalf of agent");
    }

    let record = conversations::set_assignment(&state.pool, conversation_id, Some(agent_id))
        .await?
        .ok_or(ApiError::NotFound)?;

    tracing::info!(conversation_id = %conversation_id, agent_id = %agent_id, "Conversation assigned");
    Ok(announce(&state, record).await)
}

pub async fn unassign(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ApiEnvelope<ConversationState>>> {
    let record = conversations::set_assignment(&state.pool, conversation_id, None)
        .await?
        .ok_or(ApiError::NotFound)?;

    tracing::info!(conversation_id = %conversation_id, by = %auth_user.user_id, "Conversation unassigned");
    Ok(announce(&state, record).await)
}

/// Archive the conversation; it becomes eligible for retention cleanup
pub async fn end_conversation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ApiEnvelope<ConversationState>>> {
    let record = conversations::archive(&state.pool, conversation_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    state.suggestions.take(conversation_id).await;

    tracing::info!(conversation_id = %conversation_id, by = %auth_user.user_id, "Conversation ended");
    Ok(announce(&state, record).await)
}

pub async fn mark_seen(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
    body: Option<Json<MarkSeenRequest>>,
) -> ApiResult<Json<ApiEnvelope<serde_json::Value>>> {
    let seen_at = body
        .and_then(|Json(b)| b.seen_at)
        .unwrap_or_else(OffsetDateTime::now_utc);

    if !conversations::exists(&state.pool, conversation_id).await? {
        return Err(ApiError::NotFound);
    }
    conversations::mark_seen(&state.pool, auth_user.user_id, conversation_id, seen_at).await?;

    Ok(Json(ApiEnvelope::ok(serde_json::json!({ "seen": true }))))
}

/// Pending AI suggestion, 404 when there is none
pub async fn get_suggestion(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ApiEnvelope<PendingSuggestion>>> {
    let suggestion = state
        .suggestions
        .get(conversation_id)
        .await
        .ok_or(ApiError::NotFound)?;
    Ok(Json(ApiEnvelope::ok(suggestion)))
}

/// Check the shared secret presented by the AI collaborator
pub fn verify_service_key(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    headers
        .get(AI_SERVICE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|presented| bool::from(presented.as_bytes().ct_eq(expected.as_bytes())))
}

/// AI collaborator pushes a suggestion for a conversation
pub async fn receive_suggestion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SuggestionCallback>,
) -> ApiResult<Json<ApiEnvelope<PendingSuggestion>>> {
    if !verify_service_key(&headers, state.config.ai_service_key.as_deref()) {
        tracing::warn!(conversation_id = %conversation_id, "AI callback with bad service key");
        return Err(ApiError::Unauthorized);
    }

    let content = messaging::validate_content(&req.content)?;
    if !conversations::exists(&state.pool, conversation_id).await? {
        return Err(ApiError::NotFound);
    }

    let suggestion = state.suggestions.put(conversation_id, content).await;
    Ok(Json(ApiEnvelope::ok(suggestion)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_verify_service_key() {
        let mut headers = HeaderMap::new();
        assert!(!verify_service_key(&headers, Some("secret")));

        headers.insert(AI_SERVICE_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(verify_service_key(&headers, Some("secret")));
        assert!(!verify_service_key(&headers, Some("secret2")));
        assert!(!verify_service_key(&headers, None));
    }
}
