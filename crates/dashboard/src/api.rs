//! REST client for the helpdesk API
//!
//! [`HelpdeskApi`] is the seam the dashboard logic talks to; [`HttpApi`] is
//! the `reqwest` implementation. An expired access token is refreshed once
//! with the stored refresh token before a request is reported as failed.

use async_trait::async_trait;
use helpdesk_shared::{
    ApiEnvelope, Conversation, Message, PasswordStatus, PendingSuggestion, ResponseAttribution,
    UserRole,
};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DashboardError, DashboardResult};

/// Timeout for individual REST calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Agent reply as submitted by the chat manager
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub conversation_id: Uuid,
    pub content: String,
    pub response_attribution: ResponseAttribution,
}

/// Operations the dashboard needs from the server
#[async_trait]
pub trait HelpdeskApi: Send + Sync {
    async fn list_conversations(&self, archived: bool) -> DashboardResult<Vec<Conversation>>;

    async fn list_messages(&self, conversation_id: Uuid) -> DashboardResult<Vec<Message>>;

    async fn send_message(&self, message: OutgoingMessage) -> DashboardResult<Message>;

    /// Pending suggestion, `None` when the server has none
    async fn get_suggestion(
        &self,
        conversation_id: Uuid,
    ) -> DashboardResult<Option<PendingSuggestion>>;

    async fn mark_seen(&self, conversation_id: Uuid, seen_at: OffsetDateTime)
        -> DashboardResult<()>;

    async fn assign(&self, conversation_id: Uuid) -> DashboardResult<()>;

    async fn unassign(&self, conversation_id: Uuid) -> DashboardResult<()>;
}

/// Signed-in agent as reported by the login endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: SessionUser,
    pub password_status: PasswordStatus,
}

#[derive(Serialize)]
struct MarkSeen {
    #[serde(with = "time::serde::rfc3339")]
    seen_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// `reqwest`-backed [`HelpdeskApi`]
pub struct HttpApi {
    client: Client,
    base_url: String,
    tokens: RwLock<Tokens>,
}

/// Unwrap the `{ success, data, error }` envelope
async fn decode<T: DeserializeOwned>(response: Response) -> DashboardResult<T> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(DashboardError::NotFound);
    }

    let body = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<ApiEnvelope<Value>>(&body)
            .ok()
            .and_then(|envelope| envelope.error)
            .unwrap_or_else(|| status.to_string());
        return Err(DashboardError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: ApiEnvelope<T> = serde_json::from_str(&body)?;
    envelope.into_result().map_err(|message| DashboardError::Api {
        status: status.as_u16(),
        message,
    })
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens: RwLock::new(Tokens::default()),
        }
    }

    /// Resume a session from stored tokens
    pub async fn with_tokens(self, access_token: String, refresh_token: String) -> Self {
        *self.tokens.write().await = Tokens {
            access: Some(access_token),
            refresh: Some(refresh_token),
        };
        self
    }

    /// Current access token, for the realtime connection
    pub async fn access_token(&self) -> Option<String> {
        self.tokens.read().await.access.clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    pub async fn login(&self, email: &str, password: &str) -> DashboardResult<LoginResponse> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let login: LoginResponse = decode(response).await?;

        *self.tokens.write().await = Tokens {
            access: Some(login.access_token.clone()),
            refresh: Some(login.refresh_token.clone()),
        };
        tracing::info!(user_id = %login.user.id, "Signed in");
        Ok(login)
    }

    /// Revoke the refresh token and forget both tokens
    pub async fn logout(&self) -> DashboardResult<()> {
        let result: DashboardResult<Value> = self.call(Method::POST, "/auth/logout", None).await;
        *self.tokens.write().await = Tokens::default();
        result.map(|_| ())
    }

    /// Rotate the token pair. Returns false when there is nothing to refresh
    /// with or the server refused the refresh token.
    async fn refresh(&self) -> DashboardResult<bool> {
        let Some(refresh_token) = self.tokens.read().await.refresh.clone() else {
            return Ok(false);
        };

        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        match decode::<LoginResponse>(response).await {
            Ok(rotated) => {
                *self.tokens.write().await = Tokens {
                    access: Some(rotated.access_token),
                    refresh: Some(rotated.refresh_token),
                };
                tracing::debug!("Access token refreshed");
                Ok(true)
            }
            Err(DashboardError::Api { status, message }) if status == 401 || status == 403 => {
                tracing::warn!(status, reason = %message, "Refresh rejected, session ended");
                *self.tokens.write().await = Tokens::default();
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> DashboardResult<Response> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(token) = self.tokens.read().await.access.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> DashboardResult<T> {
        let response = self.send_once(method.clone(), path, body.as_ref()).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED && self.refresh().await? {
            self.send_once(method, path, body.as_ref()).await?
        } else {
            response
        };

        decode(response).await
    }
}

#[async_trait]
impl HelpdeskApi for HttpApi {
    async fn list_conversations(&self, archived: bool) -> DashboardResult<Vec<Conversation>> {
        let path = format!("/conversations?archived={}", archived);
        self.call(Method::GET, &path, None).await
    }

    async fn list_messages(&self, conversation_id: Uuid) -> DashboardResult<Vec<Message>> {
        let path = format!("/conversations/{}/messages", conversation_id);
        self.call(Method::GET, &path, None).await
    }

    async fn send_message(&self, message: OutgoingMessage) -> DashboardResult<Message> {
        let body = serde_json::to_value(&message)?;
        self.call(Method::POST, "/messages", Some(body)).await
    }

    async fn get_suggestion(
        &self,
        conversation_id: Uuid,
    ) -> DashboardResult<Option<PendingSuggestion>> {
        let path = format!("/conversations/{}/ai-suggestion", conversation_id);
        match self.call(Method::GET, &path, None).await {
            Ok(suggestion) => Ok(Some(suggestion)),
            Err(DashboardError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn mark_seen(
        &self,
        conversation_id: Uuid,
        seen_at: OffsetDateTime,
    ) -> DashboardResult<()> {
        let path = format!("/conversations/{}/mark-seen", conversation_id);
        let body = serde_json::to_value(MarkSeen { seen_at })?;
        let _: Value = self.call(Method::POST, &path, Some(body)).await?;
        Ok(())
    }

    async fn assign(&self, conversation_id: Uuid) -> DashboardResult<()> {
        let path = format!("/conversations/{}/assign", conversation_id);
        let _: Value = self.call(Method::POST, &path, Some(json!({}))).await?;
        Ok(())
    }

    async fn unassign(&self, conversation_id: Uuid) -> DashboardResult<()> {
        let path = format!("/conversations/{}/unassign", conversation_id);
        let _: Value = self.call(Method::POST, &path, None).await?;
        Ok(())
    }
}
