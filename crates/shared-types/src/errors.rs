//! # Error Types
//!
//! Errors raised while decoding backend payloads.

use thiserror::Error;

/// A backend payload did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// A required field is absent, empty, or not a string.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// The payload is not valid JSON for the expected type.
    #[error("Invalid payload: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::Invalid(err.to_string())
    }
}
