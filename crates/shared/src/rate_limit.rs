//! In-memory fixed-window rate limiting
//!
//! Limits are configurable via environment variables:
//! - `RATE_LIMIT_LOGIN_PER_MINUTE`: Login attempts per IP (default: 10)
//! - `RATE_LIMIT_REFRESH_PER_MINUTE`: Token refreshes per IP (default: 30)
//! - `RATE_LIMIT_VISITOR_MESSAGES_PER_MINUTE`: Widget messages per visitor (default: 30)
//! - `RATE_LIMIT_UPLOADS_PER_MINUTE`: File uploads per user (default: 10)

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

fn env_limit(cell: &'static OnceLock<u32>, var: &str, default: u32) -> u32 {
    *cell.get_or_init(|| {
        std::env::var(var)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    })
}

fn get_login_rate_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    env_limit(&LIMIT, "RATE_LIMIT_LOGIN_PER_MINUTE", 10)
}

fn get_refresh_rate_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    env_limit(&LIMIT, "RATE_LIMIT_REFRESH_PER_MINUTE", 30)
}

fn get_visitor_message_rate_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    env_limit(&LIMIT, "RATE_LIMIT_VISITOR_MESSAGES_PER_MINUTE", 30)
}

fn get_upload_rate_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    env_limit(&LIMIT, "RATE_LIMIT_UPLOADS_PER_MINUTE", 10)
}

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per minute allowed
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
        }
    }
}

/// Rate limit check result
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: OffsetDateTime,
    pub retry_after_seconds: Option<u32>,
}

/// Fixed one-minute windows keyed by string
struct WindowStore {
    /// key -> (count, window_start)
    windows: RwLock<HashMap<String, (u32, i64)>>,
}

impl WindowStore {
    fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
        }
    }

    async fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let window_start = now - (now % 60);

        let mut windows = self.windows.write().await;
        let entry = windows.entry(key.to_string()).or_insert((0, window_start));

        if entry.1 != window_start {
            entry.0 = 0;
            entry.1 = window_start;
        }

        let current_count = entry.0;
        let allowed = current_count < config.requests_per_minute;
        if allowed {
            entry.0 += 1;
        }

        let remaining = config
            .requests_per_minute
            .saturating_sub(current_count + u32::from(allowed));
        let reset_at = OffsetDateTime::from_unix_timestamp(window_start + 60)
            .unwrap_or(OffsetDateTime::now_utc());
        let retry_after_seconds = (!allowed).then(|| (window_start + 60 - now) as u32);

        RateLimitResult {
            allowed,
            remaining,
            reset_at,
            retry_after_seconds,
        }
    }

    async fn cleanup(&self) -> usize {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let cutoff = now - 3600;

        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, (_, start)| *start > cutoff);
        before - windows.len()
    }
}

/// Rate limiter service, cheap to clone
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<WindowStore>,
}

impl RateLimiter {
    pub fn new_in_memory() -> Self {
        Self {
            inner: Arc::new(WindowStore::new()),
        }
    }

    /// Check an arbitrary key against an explicit limit
    pub async fn check(&self, key: &str, requests_per_minute: u32) -> RateLimitResult {
        let config = RateLimitConfig {
            requests_per_minute,
        };
        self.inner.check(key, &config).await
    }

    /// Login attempts by client IP
    pub async fn check_login_by_ip(&self, ip_address: &str) -> RateLimitResult {
        let key = format!("ratelimit:login:ip:{}", ip_address);
        self.check(&key, get_login_rate_limit()).await
    }

    /// Token refreshes by client IP
    pub async fn check_refresh_by_ip(&self, ip_address: &str) -> RateLimitResult {
        let key = format!("ratelimit:refresh:ip:{}", ip_address);
        self.check(&key, get_refresh_rate_limit()).await
    }

    /// Widget messages by visitor
    pub async fn check_visitor_message(&self, visitor_id: &str) -> RateLimitResult {
        let key = format!("ratelimit:visitor:{}", visitor_id);
        self.check(&key, get_visitor_message_rate_limit()).await
    }

    /// File uploads by user
    pub async fn check_upload(&self, user_id: Uuid) -> RateLimitResult {
        let key = format!("ratelimit:upload:{}", user_id);
        self.check(&key, get_upload_rate_limit()).await
    }

    /// Drop windows older than an hour, returning how many were evicted
    pub async fn cleanup(&self) -> usize {
        self.inner.cleanup().await
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_allows_within_limit() {
        let limiter = RateLimiter::new_in_memory();

        for i in 0..5 {
            let result = limiter.check("test:key", 10).await;
            assert!(result.allowed, "Request {} should be allowed", i);
            assert_eq!(result.remaining, 10 - i - 1);
        }
    }

    #[tokio::test]
    async fn test_rate_limiter_blocks_over_limit() {
        let limiter = RateLimiter::new_in_memory();

        for _ in 0..3 {
            limiter.check("test:key", 3).await;
        }

        let result = limiter.check("test:key", 3).await;
        assert!(!result.allowed);
        assert!(result.retry_after_seconds.is_some());
        assert_eq!(result.remaining, 0);
    }

    #[tokio::test]
    async fn test_rate_limiter_separate_keys() {
        let limiter = RateLimiter::new_in_memory();

        for _ in 0..3 {
            limiter.check("key:1", 3).await;
        }

        assert!(!limiter.check("key:1", 3).await.allowed);
        assert!(limiter.check("key:2", 3).await.allowed);
    }

    #[tokio::test]
    async fn test_login_and_upload_keys_do_not_collide() {
        let limiter = RateLimiter::new_in_memory();
        let user_id = Uuid::new_v4();

        for _ in 0..get_login_rate_limit() {
            limiter.check_login_by_ip("10.0.0.1").await;
        }

        assert!(!limiter.check_login_by_ip("10.0.0.1").await.allowed);
        assert!(limiter.check_login_by_ip("10.0.0.2").await.allowed);
        assert!(limiter.check_upload(user_id).await.allowed);
    }

    #[tokio::test]
    async fn test_rate_limiter_clone_shares_state() {
        let limiter = RateLimiter::new_in_memory();
        let cloned = limiter.clone();

        limiter.check("shared", 2).await;
        let result = cloned.check("shared", 2).await;
        assert!(result.allowed);
        assert_eq!(result.remaining, 0);

        assert!(!cloned.check("shared", 2).await.allowed);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_windows() {
        let limiter = RateLimiter::new_in_memory();
        limiter.check("recent", 5).await;

        assert_eq!(limiter.cleanup().await, 0);
        assert!(!limiter.inner.windows.read().await.is_empty());
    }
}
