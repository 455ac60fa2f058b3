//! Dashboard client error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Resource not found")]
    NotFound,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Seen-state storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("No conversation selected")]
    NoSelection,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("A send is already in progress")]
    SendInProgress,
}

impl DashboardError {
    /// Returns true if retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            DashboardError::Http(_) | DashboardError::WebSocket(_) => true,
            DashboardError::Api { status, .. } => *status >= 500,
            DashboardError::NotFound
            | DashboardError::Json(_)
            | DashboardError::Storage(_)
            | DashboardError::NoSelection
            | DashboardError::EmptyMessage
            | DashboardError::SendInProgress => false,
        }
    }
}

pub type DashboardResult<T> = Result<T, DashboardError>;
