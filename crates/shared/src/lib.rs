//! Helpdesk Shared Types and Utilities
//!
//! This crate contains types, errors, and utilities shared by the API server,
//! the maintenance worker, and the agent dashboard client.

pub mod db;
pub mod error;
pub mod events;
pub mod rate_limit;
pub mod types;

pub use db::*;
pub use error::*;
pub use events::{ClientEvent, MessageEvent, ServerEvent};
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use types::*;
