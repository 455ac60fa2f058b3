//! Staff accounts: lookup, credential checks and password state updates

use helpdesk_shared::UserRole;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::password::verify_password;
use crate::error::ApiError;

/// Full user row as needed by the auth flows
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
    pub password_changed_at: OffsetDateTime,
    pub password_expires_at: Option<OffsetDateTime>,
    pub password_blocked: bool,
    pub last_login_at: Option<OffsetDateTime>,
}

const USER_COLUMNS: &str = "id, email, name, password_hash, role, is_active, \
     password_changed_at, password_expires_at, password_blocked, last_login_at";

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>, sqlx::Error> {
    sqlx::query_as::<_, UserRecord>(&format!(
        "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
        USER_COLUMNS
    ))
    .bind(email.trim())
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>, sqlx::Error> {
    sqlx::query_as::<_, UserRecord>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Check a login attempt against the looked-up account.
///
/// Deactivation is checked before the password, so a deactivated account
/// gets 403 whether or not the password is right. Unknown email and wrong
/// password produce the same error.
pub fn authenticate(user: Option<UserRecord>, password: &str) -> Result<UserRecord, ApiError> {
    let Some(user) = user else {
        return Err(ApiError::InvalidCredentials);
    };

    if !user.is_active {
        return Err(ApiError::AccountDeactivated);
    }

    match verify_password(password, &user.password_hash) {
        Ok(true) => Ok(user),
        Ok(false) => Err(ApiError::InvalidCredentials),
        Err(e) => {
            tracing::error!(user_id = %user.id, error = %e, "Stored password hash is unreadable");
            Err(ApiError::InvalidCredentials)
        }
    }
}

pub async fn record_login(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Store a new password hash, open a fresh expiry window and clear any block
pub async fn set_password(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
    changed_at: OffsetDateTime,
    expires_at: OffsetDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $2,
            password_changed_at = $3,
            password_expires_at = $4,
            password_blocked = FALSE,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(password_hash)
    .bind(changed_at)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn deactivate(pool: &PgPool, user_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1 AND is_active",
    )
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
