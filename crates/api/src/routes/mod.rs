//! API routes

pub mod admin;
pub mod auth;
pub mod conversations;
pub mod health;
pub mod messages;
pub mod statistics;
pub mod uploads;
pub mod widget;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

/// Room for multipart framing on top of the upload cap
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public routes: login, widget traffic, AI collaborator callback
    let public_api_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/conversations", post(conversations::create_conversation))
        .route(
            "/conversations/:id/ai-suggestion",
            post(conversations::receive_suggestion),
        )
        .route("/widget/messages", post(widget::send_visitor_message))
        .route(
            "/widget/conversations/:id/messages",
            get(widget::visitor_messages),
        )
        .route("/uploads/:filename", get(uploads::download));

    // Staff routes (bearer token required)
    let protected_api_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/change-password", post(auth::change_password))
        .route("/auth/password-status", get(auth::password_status))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/:id/messages", get(conversations::list_messages))
        .route("/conversations/:id/assign", post(conversations::assign))
        .route("/conversations/:id/unassign", post(conversations::unassign))
        .route("/conversations/:id/end", post(conversations::end_conversation))
        .route("/conversations/:id/mark-seen", post(conversations::mark_seen))
        .route(
            "/conversations/:id/ai-suggestion",
            get(conversations::get_suggestion),
        )
        .route("/messages", post(messages::send_message))
        .route("/upload", post(uploads::upload))
        .route("/statistics/dashboard", get(statistics::dashboard))
        .route("/statistics/agents", get(statistics::agents))
        .route("/statistics/conversations", get(statistics::conversations))
        .route("/statistics/templates", get(statistics::templates))
        .route("/statistics/ai-suggestions", get(statistics::ai_suggestions))
        .route("/admin/cleanup/dry-run", post(admin::cleanup::dry_run))
        .route("/admin/cleanup/trigger", post(admin::cleanup::trigger))
        .route("/admin/cleanup/stats", get(admin::cleanup::stats))
        .route(
            "/admin/users/:id/regenerate-password",
            post(admin::users::regenerate_password),
        )
        .route("/admin/users/:id/deactivate", post(admin::users::deactivate))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    let api_routes = public_api_routes.merge(protected_api_routes);

    let body_limit = state.config.upload_max_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .merge(health_routes)
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::AccountSnapshot;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use helpdesk_shared::UserRole;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;
    use uuid::Uuid;

    /// Cached account so the middleware never touches the database
    fn signed_in(state: &AppState, role: UserRole, expires_in_days: i64) -> String {
        let user_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        state.auth_cache.set(
            user_id,
            AccountSnapshot {
                role,
                name: "Ada".to_string(),
                is_active: true,
                password_changed_at: now - Duration::days(10),
                password_expires_at: Some(now + Duration::days(expires_in_days)),
                password_blocked: false,
            },
        );
        let token = state
            .jwt_manager
            .generate_access_token(user_id, role, "ada@example.com", "Ada")
            .unwrap();
        format!("Bearer {}", token)
    }

    async fn send(
        app: Router,
        method: Method,
        uri: &str,
        auth: Option<&str>,
        json: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        let body = match json {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[test]
    fn test_extract_client_ip_preference() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.7"));

        headers.insert("cf-connecting-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("198.51.100.2"));
    }

    #[tokio::test]
    async fn test_liveness() {
        let app = create_router(AppState::for_tests());
        let (status, _) = send(app, Method::GET, "/health/live", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let app = create_router(AppState::for_tests());
        let (status, body) = send(app, Method::GET, "/api/conversations", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_expired_password_limited_to_allow_list() {
        let state = AppState::for_tests();
        let bearer = signed_in(&state, UserRole::Agent, -2);
        let app = create_router(state);

        let (status, body) = send(
            app.clone(),
            Method::GET,
            "/api/conversations",
            Some(&bearer),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "PASSWORD_EXPIRED");

        let (status, body) = send(
            app.clone(),
            Method::GET,
            "/api/auth/password-status",
            Some(&bearer),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["level"], "expired");
        assert_eq!(body["data"]["blocked"], true);

        // Reaches the handler, which rejects the weak password before any DB access
        let (status, body) = send(
            app,
            Method::POST,
            "/api/auth/change-password",
            Some(&bearer),
            Some(r#"{"current_password":"Old-Password-123!","new_password":"short"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_admin_routes_reject_agents() {
        let state = AppState::for_tests();
        let bearer = signed_in(&state, UserRole::Agent, 60);
        let app = create_router(state);

        let (status, body) = send(
            app,
            Method::POST,
            "/api/admin/cleanup/dry-run",
            Some(&bearer),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_suggestion_lifecycle_over_http() {
        let state = AppState::for_tests();
        let bearer = signed_in(&state, UserRole::Agent, 60);
        let conversation_id = Uuid::new_v4();
        let uri = format!("/api/conversations/{}/ai-suggestion", conversation_id);
        let app = create_router(state.clone());

        let (status, _) = send(app.clone(), Method::GET, &uri, Some(&bearer), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        state
            .suggestions
            .put(conversation_id, "Try restarting the router.".to_string())
            .await;

        let (status, body) = send(app, Method::GET, &uri, Some(&bearer), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["content"], "Try restarting the router.");
    }

    #[tokio::test]
    async fn test_suggestion_callback_requires_service_key() {
        let app = create_router(AppState::for_tests());
        let uri = format!("/api/conversations/{}/ai-suggestion", Uuid::new_v4());

        let (status, _) = send(
            app,
            Method::POST,
            &uri,
            None,
            Some(r#"{"content":"hello"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_widget_rejects_bad_visitor_id() {
        let app = create_router(AppState::for_tests());
        let (status, body) = send(
            app,
            Method::POST,
            "/api/widget/messages",
            None,
            Some(r#"{"visitor_id":"../../x","content":"hi"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_upload_download_rejects_unsanitized_names() {
        let app = create_router(AppState::for_tests());
        let (status, _) = send(app, Method::GET, "/api/uploads/passwd.txt", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_security_headers_on_api_errors() {
        let app = create_router(AppState::for_tests())
            .layer(axum::middleware::from_fn(crate::security::security_headers_middleware));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/conversations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }
}
