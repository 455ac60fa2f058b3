//! Agent message send

use axum::{extract::State, Extension, Json};
use helpdesk_shared::{ApiEnvelope, Message, ResponseAttribution};
use serde::Deserialize;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiResult, messaging, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    pub content: String,
    pub response_attribution: Option<ResponseAttribution>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<ApiEnvelope<Message>>> {
    let message = messaging::accept_agent_reply(
        &state,
        &auth_user,
        req.conversation_id,
        &req.content,
        req.response_attribution,
    )
    .await?;

    Ok(Json(ApiEnvelope::ok(message)))
}
