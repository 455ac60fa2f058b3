//! Error types shared across the helpdesk crates

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelpdeskError {
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}
