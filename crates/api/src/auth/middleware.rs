//! Bearer authentication middleware

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, Request},
    middleware::Next,
    response::Response,
};
use helpdesk_shared::{PasswordStatus, UserRole};
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::account;
use crate::auth::cache::{AccountSnapshot, AuthCache};
use crate::auth::expiry::PasswordPolicy;
use crate::auth::jwt::JwtManager;
use crate::error::ApiError;

/// State needed by the auth middleware
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub pool: PgPool,
    pub auth_cache: Arc<AuthCache>,
    pub password_policy: PasswordPolicy,
}

/// Authenticated staff member, inserted as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: UserRole,
    pub email: String,
    pub name: String,
    pub password_status: PasswordStatus,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == UserRole::Admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

/// Extract the token from an `Authorization` header value.
///
/// The scheme keyword is case-sensitive and must be followed by exactly one
/// space; any whitespace in the remainder is rejected.
pub fn parse_bearer(value: &str) -> Option<&str> {
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return None;
    }
    Some(token)
}

/// Endpoints reachable while the password is expired or blocked
pub fn allowed_while_blocked(method: &Method, path: &str) -> bool {
    let path = path.strip_prefix("/api").unwrap_or(path);
    matches!(
        (method, path),
        (&Method::GET, "/auth/password-status")
            | (&Method::POST, "/auth/change-password")
            | (&Method::POST, "/auth/logout")
    )
}

impl AuthState {
    async fn load_account(&self, user_id: Uuid) -> Result<AccountSnapshot, ApiError> {
        if let Some(snapshot) = self.auth_cache.get(user_id) {
            return Ok(snapshot);
        }

        let user = account::find_by_id(&self.pool, user_id)
            .await?
            .ok_or(ApiError::InvalidToken)?;
        let snapshot = AccountSnapshot::from(&user);
        self.auth_cache.set(user_id, snapshot.clone());
        Ok(snapshot)
    }

    /// Resolve an access token to an active account and its password status.
    ///
    /// Does not enforce the password block; callers decide what a blocked
    /// account may reach.
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, ApiError> {
        let claims = self.jwt_manager.validate_access_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            ApiError::InvalidToken
        })?;

        let snapshot = self.load_account(claims.sub).await?;

        if !snapshot.is_active {
            tracing::warn!(user_id = %claims.sub, "Request from deactivated account");
            return Err(ApiError::AccountDeactivated);
        }

        let password_status = self.password_policy.status(
            snapshot.role,
            snapshot.password_changed_at,
            snapshot.password_expires_at,
            snapshot.password_blocked,
            OffsetDateTime::now_utc(),
        );

        Ok(AuthUser {
            user_id: claims.sub,
            role: snapshot.role,
            email: claims.email,
            name: snapshot.name,
            password_status,
        })
    }
}

/// Require a valid access token for an active account
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
        .ok_or(ApiError::Unauthorized)?;

    let auth_user = auth_state.authenticate(token).await?;

    if auth_user.password_status.blocked
        && !allowed_while_blocked(request.method(), request.uri().path())
    {
        tracing::info!(
            user_id = %auth_user.user_id,
            path = %request.uri().path(),
            "Blocked request from account with expired password"
        );
        return Err(ApiError::PasswordExpired);
    }

    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{
        extract::Extension,
        http::StatusCode,
        middleware,
        routing::{get, post},
        Router,
    };
    use sqlx::postgres::PgPoolOptions;
    use time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret-key-at-least-32-chars!";

    fn auth_state() -> AuthState {
        AuthState {
            jwt_manager: JwtManager::new(SECRET, 15),
            pool: PgPoolOptions::new()
                .connect_lazy("postgres://localhost/helpdesk_test")
                .unwrap(),
            auth_cache: Arc::new(AuthCache::new()),
            password_policy: PasswordPolicy {
                expiry_days: 90,
                enforced_roles: vec![UserRole::Agent],
            },
        }
    }

    fn snapshot(is_active: bool, expires_in_days: i64) -> AccountSnapshot {
        let now = OffsetDateTime::now_utc();
        AccountSnapshot {
            role: UserRole::Agent,
            name: "Ada".to_string(),
            is_active,
            password_changed_at: now - Duration::days(30),
            password_expires_at: Some(now + Duration::days(expires_in_days)),
            password_blocked: false,
        }
    }

    async fn whoami(Extension(user): Extension<AuthUser>) -> String {
        user.name
    }

    fn app(state: AuthState) -> Router {
        Router::new()
            .route("/conversations", get(whoami))
            .route("/auth/password-status", get(whoami))
            .route("/auth/logout", post(whoami))
            .layer(middleware::from_fn_with_state(state, require_auth))
    }

    fn token_for(state: &AuthState, user_id: Uuid) -> String {
        state
            .jwt_manager
            .generate_access_token(user_id, UserRole::Agent, "ada@example.com", "Ada")
            .unwrap()
    }

    async fn call(app: Router, method: Method, uri: &str, auth: Option<String>) -> StatusCode {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(parse_bearer("bearer abc"), None);
        assert_eq!(parse_bearer("BEARER abc"), None);
        assert_eq!(parse_bearer("Bearer  abc"), None);
        assert_eq!(parse_bearer("Bearer\tabc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("Bearer abc "), None);
        assert_eq!(parse_bearer("Basic abc"), None);
    }

    #[test]
    fn test_blocked_allow_list() {
        assert!(allowed_while_blocked(&Method::GET, "/api/auth/password-status"));
        assert!(allowed_while_blocked(&Method::POST, "/auth/change-password"));
        assert!(allowed_while_blocked(&Method::POST, "/api/auth/logout"));
        assert!(!allowed_while_blocked(&Method::GET, "/api/auth/logout"));
        assert!(!allowed_while_blocked(&Method::GET, "/api/conversations"));
        assert!(!allowed_while_blocked(&Method::GET, "/api/auth/me"));
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header_is_401() {
        let state = auth_state();
        let token = token_for(&state, Uuid::new_v4());

        assert_eq!(
            call(app(state.clone()), Method::GET, "/conversations", None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            call(
                app(state),
                Method::GET,
                "/conversations",
                Some(format!("bearer {}", token))
            )
            .await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_active_account_passes() {
        let state = auth_state();
        let user_id = Uuid::new_v4();
        state.auth_cache.set(user_id, snapshot(true, 60));
        let token = token_for(&state, user_id);

        let status = call(
            app(state),
            Method::GET,
            "/conversations",
            Some(format!("Bearer {}", token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_deactivated_account_is_403() {
        let state = auth_state();
        let user_id = Uuid::new_v4();
        state.auth_cache.set(user_id, snapshot(false, 60));
        let token = token_for(&state, user_id);

        let status = call(
            app(state),
            Method::GET,
            "/conversations",
            Some(format!("Bearer {}", token)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_expired_password_only_reaches_allow_list() {
        let state = auth_state();
        let user_id = Uuid::new_v4();
        state.auth_cache.set(user_id, snapshot(true, -1));
        let bearer = format!("Bearer {}", token_for(&state, user_id));

        assert_eq!(
            call(app(state.clone()), Method::GET, "/conversations", Some(bearer.clone())).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            call(
                app(state.clone()),
                Method::GET,
                "/auth/password-status",
                Some(bearer.clone())
            )
            .await,
            StatusCode::OK
        );
        assert_eq!(
            call(app(state), Method::POST, "/auth/logout", Some(bearer)).await,
            StatusCode::OK
        );
    }
}
