//! Public widget routes used by visitors

use axum::{
    extract::{Path, Query, State},
    Json,
};
use helpdesk_shared::{ApiEnvelope, Message};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    conversations,
    error::{ApiError, ApiResult},
    messaging,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct VisitorMessageRequest {
    pub visitor_id: String,
    /// Omitted on the first message; the visitor's open conversation is
    /// reused or a new one is started
    pub conversation_id: Option<Uuid>,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct VisitorMessageResponse {
    pub conversation_id: Uuid,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct VisitorQuery {
    pub visitor_id: String,
}

async fn check_visitor(state: &AppState, visitor_id: &str) -> ApiResult<()> {
    if !conversations::valid_visitor_id(visitor_id) {
        return Err(ApiError::Validation("Invalid visitor id".to_string()));
    }
    if !state.rate_limiter.check_visitor_message(visitor_id).await.allowed {
        tracing::warn!(visitor_id = %visitor_id, "Visitor rate limit exceeded");
        return Err(ApiError::RateLimited);
    }
    Ok(())
}

/// Conversation the visitor may write to
async fn resolve_conversation(
    state: &AppState,
    visitor_id: &str,
    requested: Option<Uuid>,
) -> ApiResult<Uuid> {
    if let Some(conversation_id) = requested {
        let record = conversations::find(&state.pool, conversation_id)
            .await?
            .filter(|c| c.visitor_id == visitor_id)
            .ok_or(ApiError::AccessDenied)?;
        if record.archived {
            return Err(ApiError::BadRequest("Conversation has ended".to_string()));
        }
        return Ok(record.id);
    }

    match conversations::find_open_for_visitor(&state.pool, visitor_id).await? {
        Some(record) => Ok(record.id),
        None => Ok(conversations::create(&state.pool, visitor_id, None).await?.id),
    }
}

pub async fn send_visitor_message(
    State(state): State<AppState>,
    Json(req): Json<VisitorMessageRequest>,
) -> ApiResult<Json<ApiEnvelope<VisitorMessageResponse>>> {
    check_visitor(&state, &req.visitor_id).await?;
    messaging::validate_content(&req.content)?;

    let conversation_id = resolve_conversation(&state, &req.visitor_id, req.conversation_id).await?;
    let message = messaging::accept_visitor_message(&state, conversation_id, &req.content).await?;

    Ok(Json(ApiEnvelope::ok(VisitorMessageResponse {
        conversation_id,
        message,
    })))
}

/// Transcript for the visitor's own conversation
pub async fn visitor_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<VisitorQuery>,
) -> ApiResult<Json<ApiEnvelope<Vec<Message>>>> {
    if !conversations::valid_visitor_id(&query.visitor_id)
        || !conversations::visitor_owns(&state.pool, conversation_id, &query.visitor_id).await?
    {
        return Err(ApiError::AccessDenied);
    }

    let messages = conversations::list_messages(&state.pool, conversation_id).await?;
    Ok(Json(ApiEnvelope::ok(messages)))
}
