//! In-memory account status cache with TTL
//!
//! Caches the fields the auth middleware needs on every request so a burst
//! of calls from one agent does not hit the users table each time.

use helpdesk_shared::UserRole;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::account::UserRecord;

/// Default cache TTL (30 seconds)
pub const DEFAULT_AUTH_CACHE_TTL: Duration = Duration::from_secs(30);

/// Account fields checked per request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub role: UserRole,
    pub name: String,
    pub is_active: bool,
    pub password_changed_at: OffsetDateTime,
    pub password_expires_at: Option<OffsetDateTime>,
    pub password_blocked: bool,
}

impl From<&UserRecord> for AccountSnapshot {
    fn from(user: &UserRecord) -> Self {
        Self {
            role: user.role,
            name: user.name.clone(),
            is_active: user.is_active,
            password_changed_at: user.password_changed_at,
            password_expires_at: user.password_expires_at,
            password_blocked: user.password_blocked,
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    snapshot: AccountSnapshot,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(snapshot: AccountSnapshot, ttl: Duration) -> Self {
        Self {
            snapshot,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe account status cache keyed by user id
pub struct AuthCache {
    cache: RwLock<HashMap<Uuid, CacheEntry>>,
    ttl: Duration,
}

impl Default for AuthCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_AUTH_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached snapshot, or `None` if absent or expired
    pub fn get(&self, user_id: Uuid) -> Option<AccountSnapshot> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(&user_id)?;

        if entry.is_expired() {
            None
        } else {
            Some(entry.snapshot.clone())
        }
    }

    pub fn set(&self, user_id: Uuid, snapshot: AccountSnapshot) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(user_id, CacheEntry::new(snapshot, self.ttl));
        }
    }

    /// Drop a user's entry after password change, regeneration or deactivation
    pub fn invalidate(&self, user_id: Uuid) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&user_id);
        }
    }

    /// Clear expired entries
    pub fn cleanup(&self) -> usize {
        match self.cache.write() {
            Ok(mut cache) => {
                let before = cache.len();
                cache.retain(|_, entry| !entry.is_expired());
                before - cache.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
