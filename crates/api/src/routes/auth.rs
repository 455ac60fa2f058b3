//! Authentication routes

use axum::{extract::State, http::HeaderMap, Extension, Json};
use helpdesk_shared::{ApiEnvelope, PasswordStatus, UserRole};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{
        account::{self, UserRecord},
        hash_password,
        refresh_tokens::check_record,
        validate_password_strength, verify_password, AuthUser, RefreshCheck,
    },
    error::{ApiError, ApiResult},
    routes::extract_client_ip,
    state::AppState,
    system_log::{self, event, level},
};

/// Floor on login response time so lookups and hash checks are not observable
const MIN_LOGIN_RESPONSE_TIME: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserResponse,
    pub password_status: PasswordStatus,
}

fn client_ip(headers: &HeaderMap) -> String {
    extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string())
}

/// Mint an access token and rotate the single refresh token
async fn issue_session(state: &AppState, user: &UserRecord) -> ApiResult<AuthResponse> {
    let access_token = state
        .jwt_manager
        .generate_access_token(user.id, user.role, &user.email, &user.name)
        .map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "Failed to sign access token");
            ApiError::Internal
        })?;
    let refresh_token = state.refresh_tokens.issue(user.id).await?;

    let password_status = state.password_policy.status(
        user.role,
        user.password_changed_at,
        user.password_expires_at,
        user.password_blocked,
        OffsetDateTime::now_utc(),
    );

    Ok(AuthResponse {
        access_token,
        refresh_token,
        token_type: "Bearer",
        expires_in: state.jwt_manager.access_token_expiry_seconds(),
        user: UserResponse {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        },
        password_status,
    })
}

/// Log in with email and password
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<ApiEnvelope<AuthResponse>>> {
    let start = std::time::Instant::now();

    let result = login_inner(&state, &headers, &req).await;

    let elapsed = start.elapsed();
    if elapsed < MIN_LOGIN_RESPONSE_TIME {
        tokio::time::sleep(MIN_LOGIN_RESPONSE_TIME - elapsed).await;
    }

    result.map(|r| Json(ApiEnvelope::ok(r)))
}

async fn login_inner(
    state: &AppState,
    headers: &HeaderMap,
    req: &LoginRequest,
) -> ApiResult<AuthResponse> {
    let ip = client_ip(headers);

    let limit = state.rate_limiter.check_login_by_ip(&ip).await;
    if !limit.allowed {
        tracing::warn!(
            ip = %ip,
            retry_after = ?limit.retry_after_seconds,
            "login: Rate limit exceeded for IP"
        );
        return Err(ApiError::RateLimited);
    }

    let user = account::find_by_email(&state.pool, &req.email).await?;
    let user = match account::authenticate(user, &req.password) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(ip = %ip, reason = %e, "login: Rejected");
            system_log::spawn_record(
                &state.pool,
                level::WARNING,
                event::LOGIN_FAILED,
                None,
                json!({ "ip": ip, "reason": e.status_and_code().1 }),
            );
            return Err(e);
        }
    };

    account::record_login(&state.pool, user.id).await?;
    let response = issue_session(state, &user).await?;

    system_log::spawn_record(
        &state.pool,
        level::INFO,
        event::LOGIN_SUCCESS,
        Some(user.id),
        json!({ "ip": ip }),
    );
    tracing::info!(user_id = %user.id, "login: Success");

    Ok(response)
}

/// Exchange a refresh token for a new token pair
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<ApiEnvelope<AuthResponse>>> {
    let ip = client_ip(&headers);
    if !state.rate_limiter.check_refresh_by_ip(&ip).await.allowed {
        tracing::warn!(ip = %ip, "refresh: Rate limit exceeded for IP");
        return Err(ApiError::RateLimited);
    }

    let record = state.refresh_tokens.find(&req.refresh_token).await?;

    let user_id = match check_record(record.as_ref(), OffsetDateTime::now_utc()) {
        RefreshCheck::Unknown => return Err(ApiError::InvalidToken),
        RefreshCheck::Expired(user_id) => {
            state.refresh_tokens.revoke(user_id).await?;
            system_log::spawn_record(
                &state.pool,
                level::INFO,
                event::REFRESH_TOKEN_EXPIRED,
                Some(user_id),
                json!({}),
            );
            return Err(ApiError::InvalidToken);
        }
        RefreshCheck::Valid(user_id) => user_id,
    };

    let user = account::find_by_id(&state.pool, user_id)
        .await?
        .ok_or(ApiError::InvalidToken)?;

    if !user.is_active {
        state.refresh_tokens.revoke(user.id).await?;
        return Err(ApiError::AccountDeactivated);
    }

    let response = issue_session(&state, &user).await?;
    tracing::debug!(user_id = %user.id, "refresh: Token rotated");

    Ok(Json(ApiEnvelope::ok(response)))
}

/// Revoke the caller's refresh token
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ApiEnvelope<serde_json::Value>>> {
    state.refresh_tokens.revoke(auth_user.user_id).await?;

    system_log::spawn_record(
        &state.pool,
        level::INFO,
        event::LOGOUT,
        Some(auth_user.user_id),
        json!({}),
    );

    Ok(Json(ApiEnvelope::ok(json!({ "logged_out": true }))))
}

/// Change the caller's own password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<ApiEnvelope<PasswordStatus>>> {
    validate_password_strength(&req.new_password)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if req.new_password == req.current_password {
        return Err(ApiError::Validation(
            "New password must differ from the current password".to_string(),
        ));
    }

    let user = account::find_by_id(&state.pool, auth_user.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let current_ok = verify_password(&req.current_password, &user.password_hash).map_err(|e| {
        tracing::error!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
        ApiError::Internal
    })?;
    if !current_ok {
        return Err(ApiError::Validation("Current password is incorrect".to_string()));
    }

    let hash = hash_password(&req.new_password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::Internal
    })?;

    let now = OffsetDateTime::now_utc();
    let expires_at = state.password_policy.next_expiry(now);
    account::set_password(&state.pool, user.id, &hash, now, expires_at).await?;
    state.refresh_tokens.revoke(user.id).await?;
    state.auth_cache.invalidate(user.id);

    system_log::spawn_record(
        &state.pool,
        level::INFO,
        event::PASSWORD_CHANGED,
        Some(user.id),
        json!({}),
    );
    tracing::info!(user_id = %user.id, "Password changed");

    let status = state
        .password_policy
        .status(user.role, now, Some(expires_at), false, now);
    Ok(Json(ApiEnvelope::ok(status)))
}

/// Password expiry status for the caller
pub async fn password_status(
    Extension(auth_user): Extension<AuthUser>,
) -> Json<ApiEnvelope<PasswordStatus>> {
    Json(ApiEnvelope::ok(auth_user.password_status))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub password_status: PasswordStatus,
}

/// Current user profile
pub async fn me(Extension(auth_user): Extension<AuthUser>) -> Json<ApiEnvelope<MeResponse>> {
    Json(ApiEnvelope::ok(MeResponse {
        user: UserResponse {
            id: auth_user.user_id,
            email: auth_user.email,
            name: auth_user.name,
            role: auth_user.role,
        },
        password_status: auth_user.password_status,
    }))
}
