//! Persistent system log for security-relevant and maintenance events
//!
//! Event names and levels are constants so log queries can filter on them.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Severity levels
pub mod level {
    pub const INFO: &str = "info";
    pub const WARNING: &str = "warning";
    pub const CRITICAL: &str = "critical";
}

/// Event names
pub mod event {
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const LOGOUT: &str = "logout";
    pub const PASSWORD_CHANGED: &str = "password_changed";
    pub const PASSWORD_REGENERATED: &str = "password_regenerated";
    pub const ACCOUNT_DEACTIVATED: &str = "account_deactivated";
    pub const REFRESH_TOKEN_EXPIRED: &str = "refresh_token_expired";
    pub const CLEANUP_COMPLETED: &str = "cleanup_completed";
}

/// Write a log row. Failures are logged and swallowed.
pub async fn record(
    pool: &PgPool,
    level: &str,
    event: &str,
    user_id: Option<Uuid>,
    details: Value,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO system_logs (level, event, user_id, details)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(level)
    .bind(event)
    .bind(user_id)
    .bind(details)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!(error = ?e, event = %event, "Failed to write system log");
    }
}

/// Fire-and-forget variant for request handlers
pub fn spawn_record(
    pool: &PgPool,
    level: &'static str,
    event: &'static str,
    user_id: Option<Uuid>,
    details: Value,
) {
    let pool = pool.clone();
    tokio::spawn(async move {
        record(&pool, level, event, user_id, details).await;
    });
}
