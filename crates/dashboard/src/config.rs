//! Dashboard client configuration

use helpdesk_shared::AiMode;
use std::time::Duration;
use uuid::Uuid;

/// Tunables for one signed-in agent's dashboard session
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// API origin, e.g. `https://support.example.com`
    pub base_url: String,
    pub agent_id: Uuid,
    pub agent_name: String,
    pub ai_mode: AiMode,

    // Suggestion polling
    pub suggestion_poll_attempts: u32,
    pub suggestion_poll_interval: Duration,
    /// Wall-clock cap across all attempts of one poll
    pub suggestion_poll_budget: Duration,
    /// Delay before re-polling after a successful send (HITL only)
    pub repoll_delay: Duration,

    // Realtime
    pub typing_debounce: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_attempts: usize,
}

impl DashboardConfig {
    pub fn new(base_url: impl Into<String>, agent_id: Uuid, agent_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent_id,
            agent_name: agent_name.into(),
            ai_mode: AiMode::Off,
            suggestion_poll_attempts: 5,
            suggestion_poll_interval: Duration::from_secs(1),
            suggestion_poll_budget: Duration::from_secs(10),
            repoll_delay: Duration::from_secs(3),
            typing_debounce: Duration::from_secs(1),
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_attempts: 10,
        }
    }

    pub fn with_ai_mode(mut self, ai_mode: AiMode) -> Self {
        self.ai_mode = ai_mode;
        self
    }

    /// REST endpoint under the `/api` prefix
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// WebSocket URL carrying the access token
    pub fn ws_url(&self, access_token: &str) -> String {
        let origin = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/ws?token={}", origin, access_token)
    }
}
