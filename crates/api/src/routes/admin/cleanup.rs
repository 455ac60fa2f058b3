//! Retention cleanup controls

use axum::{extract::State, Extension, Json};
use helpdesk_shared::ApiEnvelope;
use serde_json::json;
use std::collections::HashSet;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    maintenance::{CleanupError, CleanupOutcome, JobStats},
    state::AppState,
    system_log::{self, event, level},
};

impl From<CleanupError> for ApiError {
    fn from(err: CleanupError) -> Self {
        match err {
            CleanupError::Database(e) => ApiError::from(e),
        }
    }
}

/// Count eligible conversations without deleting anything
pub async fn dry_run(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ApiEnvelope<CleanupOutcome>>> {
    auth_user.require_admin()?;
    let outcome = state.cleanup_service().dry_run().await?;
    Ok(Json(ApiEnvelope::ok(outcome)))
}

/// Run the cleanup now
pub async fn trigger(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ApiEnvelope<CleanupOutcome>>> {
    auth_user.require_admin()?;
    let outcome = state.cleanup_service().trigger().await?;

    if let CleanupOutcome::Completed {
        deleted,
        batches,
        deleted_ids,
        ..
    } = &outcome
    {
        let gone: HashSet<_> = deleted_ids.iter().copied().collect();
        state
            .suggestions
            .retain_conversations(|id| !gone.contains(id))
            .await;

        system_log::spawn_record(
            &state.pool,
            level::INFO,
            event::CLEANUP_COMPLETED,
            Some(auth_user.user_id),
            json!({ "deleted": deleted, "batches": batches, "source": "manual" }),
        );
    }

    Ok(Json(ApiEnvelope::ok(outcome)))
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ApiEnvelope<JobStats>>> {
    auth_user.require_admin()?;
    let stats = state.cleanup_service().stats().await?;
    Ok(Json(ApiEnvelope::ok(stats)))
}
