//! Opaque refresh tokens
//!
//! Each account has at most one active refresh token. Only the SHA-256 hash
//! is stored; the raw value is handed to the client once at issue time.

use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Stored refresh token row
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

/// Outcome of checking a presented token against its stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCheck {
    Valid(Uuid),
    Unknown,
    /// Found but past its expiry; the row must be deleted
    Expired(Uuid),
}

/// Generate a 32-byte hex-encoded token (64 characters)
pub fn generate_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Hash a token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Classify a lookup result at `now`
pub fn check_record(record: Option<&RefreshTokenRecord>, now: OffsetDateTime) -> RefreshCheck {
    match record {
        None => RefreshCheck::Unknown,
        Some(r) if r.expires_at <= now => RefreshCheck::Expired(r.user_id),
        Some(r) => RefreshCheck::Valid(r.user_id),
    }
}

/// Postgres-backed refresh token store
#[derive(Clone)]
pub struct RefreshTokenStore {
    pool: PgPool,
    ttl: Duration,
}

impl RefreshTokenStore {
    pub fn new(pool: PgPool, ttl_days: i64) -> Self {
        Self {
            pool,
            ttl: Duration::days(ttl_days),
        }
    }

    /// Issue a token for the user, replacing any existing one.
    ///
    /// Returns the raw token.
    pub async fn issue(&self, user_id: Uuid) -> Result<String, sqlx::Error> {
        let raw_token = generate_token();
        let token_hash = hash_token(&raw_token);
        let expires_at = OffsetDateTime::now_utc() + self.ttl;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET token_hash = EXCLUDED.token_hash,
                expires_at = EXCLUDED.expires_at,
                created_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(user_id = %user_id, expires_at = %expires_at, "Refresh token issued");

        Ok(raw_token)
    }

    /// Look up a presented raw token by exact hash match
    pub async fn find(&self, raw_token: &str) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT user_id, token_hash, expires_at FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(hash_token(raw_token))
        .fetch_optional(&self.pool)
        .await
    }

    /// Revoke the user's refresh token
    pub async fn revoke(&self, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete all expired tokens (scheduled maintenance)
    pub async fn purge_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(count = deleted, "Purged expired refresh tokens");
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generation() {
        let token1 = generate_token();
        let token2 = generate_token();

        assert_eq!(token1.len(), 64);
        assert_ne!(token1, token2);
        assert!(token1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_token_hashing() {
        let hash1 = hash_token("test_token_12345");
        let hash2 = hash_token("test_token_12345");

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_token("test_token_12346"));
    }

    #[test]
    fn test_check_record() {
        let now = OffsetDateTime::now_utc();
        let user_id = Uuid::new_v4();
        let record = |expires_at| RefreshTokenRecord {
            user_id,
            token_hash: hash_token("x"),
            expires_at,
        };

        assert_eq!(check_record(None, now), RefreshCheck::Unknown);
        assert_eq!(
            check_record(Some(&record(now + Duration::days(1))), now),
            RefreshCheck::Valid(user_id)
        );
        assert_eq!(
            check_record(Some(&record(now - Duration::seconds(1))), now),
            RefreshCheck::Expired(user_id)
        );
        assert_eq!(
            check_record(Some(&record(now)), now),
            RefreshCheck::Expired(user_id)
        );
    }
}
