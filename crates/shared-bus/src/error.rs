//! Transport session errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connect was refused, timed out, or the link failed to open.
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    /// The broker refused or did not acknowledge a subscription.
    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// The broker did not acknowledge a publish.
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Session is not connected")]
    NotConnected,

    #[error("Last will must be registered before connecting")]
    LastWillAfterConnect,

    #[error("Invalid topic filter: {0}")]
    InvalidFilter(String),

    #[error("Payload encoding failed: {0}")]
    Encode(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
