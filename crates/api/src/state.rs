//! Shared application state

use helpdesk_shared::RateLimiter;
use sqlx::PgPool;
use std::sync::Arc;

use crate::ai::AiClient;
use crate::auth::{AuthCache, AuthState, JwtManager, PasswordPolicy, RefreshTokenStore};
use crate::config::Config;
use crate::maintenance::{CleanupService, PgRetentionStore};
use crate::suggestions::SuggestionStore;
use crate::websocket::WebSocketState;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt_manager: JwtManager,
    pub auth_cache: Arc<AuthCache>,
    pub password_policy: PasswordPolicy,
    pub refresh_tokens: RefreshTokenStore,
    pub ws_state: WebSocketState,
    pub rate_limiter: RateLimiter,
    pub suggestions: SuggestionStore,
    pub ai_client: Option<AiClient>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_minutes);
        let password_policy = PasswordPolicy::from_config(&config);
        let refresh_tokens = RefreshTokenStore::new(pool.clone(), config.refresh_token_expiry_days);
        let ai_client =
            AiClient::from_config(config.ai_service_url.clone(), config.ai_service_key.clone());

        Self {
            pool,
            config: Arc::new(config),
            jwt_manager,
            auth_cache: Arc::new(AuthCache::new()),
            password_policy,
            refresh_tokens,
            ws_state: WebSocketState::new(),
            rate_limiter: RateLimiter::new_in_memory(),
            suggestions: SuggestionStore::new(),
            ai_client,
        }
    }

    /// Subset of state used by the auth middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            pool: self.pool.clone(),
            auth_cache: Arc::clone(&self.auth_cache),
            password_policy: self.password_policy.clone(),
        }
    }

    pub fn cleanup_service(&self) -> CleanupService<PgRetentionStore> {
        CleanupService::new(
            PgRetentionStore::new(self.pool.clone()),
            self.config.conversation_retention_days,
            self.config.cleanup_batch_size,
        )
    }

    /// State backed by a lazy pool that never connects, for router tests
    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    pub(crate) fn for_tests() -> Self {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/helpdesk_test")
            .unwrap();
        Self::new(pool, Config::for_tests())
    }
}
