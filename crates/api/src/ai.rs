//! Client for the external AI reply service
//!
//! The service receives the recent conversation transcript and returns a
//! draft reply. In HITL mode the draft becomes a pending suggestion; in
//! autopilot mode it is sent to the visitor directly.

use helpdesk_shared::{Message, SenderKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Number of trailing messages sent as context
const CONTEXT_MESSAGES: usize = 20;

const MAX_RETRIES: usize = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    conversation_id: Uuid,
    messages: Vec<TranscriptEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct TranscriptEntry<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    reply: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AiClientError {
    #[error("AI service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("AI service returned status {0}")]
    Status(u16),
    #[error("AI service returned an empty reply")]
    EmptyReply,
}

impl AiClientError {
    /// Worth another attempt: connection trouble or a 5xx
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            Self::Status(status) => *status >= 500,
            Self::EmptyReply => false,
        }
    }
}

fn role_for(kind: SenderKind) -> &'static str {
    match kind {
        SenderKind::Visitor => "user",
        SenderKind::Agent | SenderKind::Ai => "assistant",
        SenderKind::System => "system",
    }
}

impl AiClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Create from config, returns None if no service URL is configured
    pub fn from_config(base_url: Option<String>, api_key: Option<String>) -> Option<Self> {
        match base_url {
            Some(url) => Some(Self::new(url, api_key)),
            None => {
                warn!("AI_SERVICE_URL not configured - AI replies are disabled");
                None
            }
        }
    }

    /// Ask the service for a reply to the conversation so far
    pub async fn generate_reply(
        &self,
        conversation_id: Uuid,
        transcript: &[Message],
    ) -> Result<String, AiClientError> {
        let start = transcript.len().saturating_sub(CONTEXT_MESSAGES);
        let request = GenerateRequest {
            conversation_id,
            messages: transcript[start..]
                .iter()
                .map(|m| TranscriptEntry {
                    role: role_for(m.sender_kind),
                    content: &m.content,
                })
                .collect(),
        };

        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        let reply = RetryIf::spawn(
            retry_strategy,
            || self.request_once(&request),
            |e: &AiClientError| {
                if e.is_transient() {
                    debug!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Transient AI service error - will retry"
                    );
                    true
                } else {
                    false
                }
            },
        )
        .await?;

        info!(conversation_id = %conversation_id, chars = reply.len(), "AI reply generated");
        Ok(reply)
    }

    async fn request_once(&self, request: &GenerateRequest<'_>) -> Result<String, AiClientError> {
        let mut builder = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-AI-Service-Key", key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(conversation_id = %request.conversation_id, status = %status, "AI service error");
            return Err(AiClientError::Status(status.as_u16()));
        }

        let body: GenerateResponse = response.json().await?;
        body.reply
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or(AiClientError::EmptyReply)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use helpdesk_shared::MessageMetadata;
    use time::OffsetDateTime;

    fn transcript(conversation_id: Uuid) -> Vec<Message> {
        vec![Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_kind: SenderKind::Visitor,
            sender_id: None,
            content: "Where is my order?".to_string(),
            metadata: MessageMetadata::pending_agent(),
            created_at: OffsetDateTime::now_utc(),
        }]
    }

    #[tokio::test]
    async fn test_generate_reply_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .match_header("X-AI-Service-Key", "secret")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"messages":[{"role":"user","content":"Where is my order?"}]}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"reply":"  It ships tomorrow.  "}"#)
            .create_async()
            .await;

        let client = AiClient::new(server.url(), Some("secret".to_string()));
        let conversation_id = Uuid::new_v4();
        let reply = client
            .generate_reply(conversation_id, &transcript(conversation_id))
            .await
            .unwrap();

        assert_eq!(reply, "It ships tomorrow.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_reply_error_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .with_status(503)
            .expect(1 + MAX_RETRIES)
            .create_async()
            .await;

        let client = AiClient::new(server.url(), None);
        let conversation_id = Uuid::new_v4();
        let result = client
            .generate_reply(conversation_id, &transcript(conversation_id))
            .await;

        assert!(matches!(result, Err(AiClientError::Status(503))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_reply_empty() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/generate")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"reply":"   "}"#)
            .expect(1)
            .create_async()
            .await;

        let client = AiClient::new(server.url(), None);
        let result = client.generate_reply(Uuid::new_v4(), &[]).await;

        assert!(matches!(result, Err(AiClientError::EmptyReply)));
        mock.assert_async().await;
    }
}
