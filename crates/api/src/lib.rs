//! Helpdesk API Library
//!
//! REST and WebSocket server for the support helpdesk: staff auth, the
//! conversation queue, visitor widget traffic and the AI suggestion handoff.

pub mod ai;
pub mod auth;
pub mod config;
pub mod conversations;
pub mod error;
pub mod maintenance;
pub mod messaging;
pub mod routes;
pub mod security;
pub mod state;
pub mod suggestions;
pub mod system_log;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
