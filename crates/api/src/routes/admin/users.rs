//! Admin actions on staff accounts

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use helpdesk_shared::ApiEnvelope;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{account, generate_compliant_password, hash_password, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
    system_log::{self, event, level},
};

#[derive(Debug, Serialize)]
pub struct RegeneratedPassword {
    pub user_id: Uuid,
    /// Shown once; not stored in plain text anywhere
    pub password: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Drop every server-side session for the account
async fn end_sessions(state: &AppState, user_id: Uuid) -> ApiResult<()> {
    state.refresh_tokens.revoke(user_id).await?;
    state.auth_cache.invalidate(user_id);
    Ok(())
}

/// Replace the account's password with a generated one and clear any block
pub async fn regenerate_password(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<ApiEnvelope<RegeneratedPassword>>> {
    auth_user.require_admin()?;

    let password = generate_compliant_password();
    let hash = hash_password(&password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash generated password");
        ApiError::Internal
    })?;

    let now = OffsetDateTime::now_utc();
    let expires_at = state.password_policy.next_expiry(now);
    if !account::set_password(&state.pool, user_id, &hash, now, expires_at).await? {
        return Err(ApiError::NotFound);
    }
    end_sessions(&state, user_id).await?;

    system_log::spawn_record(
        &state.pool,
        level::WARNING,
        event::PASSWORD_REGENERATED,
        Some(user_id),
        json!({ "by": auth_user.user_id }),
    );
    tracing::info!(user_id = %user_id, by = %auth_user.user_id, "Password regenerated by admin");

    Ok(Json(ApiEnvelope::ok(RegeneratedPassword {
        user_id,
        password,
        expires_at,
    })))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<ApiEnvelope<serde_json::Value>>> {
    auth_user.require_admin()?;
    if user_id == auth_user.user_id {
        return Err(ApiError::BadRequest(
            "You cannot deactivate your own account".to_string(),
        ));
    }

    // Already-inactive accounts still get their sessions cleared
    if !account::deactivate(&state.pool, user_id).await?
        && account::find_by_id(&state.pool, user_id).await?.is_none()
    {
        return Err(ApiError::NotFound);
    }
    end_sessions(&state, user_id).await?;

    system_log::spawn_record(
        &state.pool,
        level::CRITICAL,
        event::ACCOUNT_DEACTIVATED,
        Some(user_id),
        json!({ "by": auth_user.user_id }),
    );
    tracing::warn!(user_id = %user_id, by = %auth_user.user_id, "Account deactivated");

    Ok(Json(ApiEnvelope::ok(json!({ "deactivated": true }))))
}
