//! WebSocket support for realtime conversation sync
//!
//! Agents and widget visitors share one endpoint. Agents authenticate with
//! an access token; visitors identify with their widget visitor id and may
//! only join their own conversations.
//!
//! # Architecture
//!
//! - **Connection**: One socket, tagged with its participant
//! - **Room**: Conversation channels plus the shared agents channel
//! - **State**: Connection registry and fan-out of REST-originated events
//! - **Handler**: Axum upgrade handler and client event routing

pub mod connection;
pub mod handler;
pub mod room;
pub mod state;

pub use connection::{Connection, Participant};
pub use handler::ws_handler;
pub use room::Room;
pub use state::WebSocketState;
