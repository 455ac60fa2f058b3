//! Helpdesk Agent Dashboard Client
//!
//! Headless client-side logic for the agent dashboard: queue ordering and
//! unseen tracking, the send / AI-suggestion handoff, realtime sync with
//! reconnects, and the REST client it all runs against.

pub mod api;
pub mod chat;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod queue;
pub mod realtime;

pub use api::{HelpdeskApi, HttpApi, LoginResponse, OutgoingMessage};
pub use chat::{classify, ChatManager, ChatState, DraftOrigin, SuggestionPoll};
pub use config::DashboardConfig;
pub use dashboard::{Changes, Dashboard};
pub use error::{DashboardError, DashboardResult};
pub use queue::{JsonFileSeenStore, MemorySeenStore, QueueItem, QueueOp, QueueView, SeenStore};
pub use realtime::{RealtimeClient, RealtimeEvent};
