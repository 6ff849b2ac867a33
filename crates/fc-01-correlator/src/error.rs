//! Error types for the correlator

use shared_bus::TransportError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelatorError {
    /// Another call is already waiting on this outcome pair.
    #[error("Correlator busy: a call is already waiting on {accepted}")]
    Busy { accepted: String },

    /// Neither outcome arrived before the deadline.
    #[error("No outcome on {request} within {timeout:?}")]
    Timeout { request: String, timeout: Duration },

    /// Subscribing to the outcome pair or publishing the request failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request payload could not be encoded.
    #[error("Request encoding failed: {0}")]
    Encode(String),
}

impl CorrelatorError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, CorrelatorError::Timeout { .. })
    }
}

pub type CorrelatorResult<T> = Result<T, CorrelatorError>;
