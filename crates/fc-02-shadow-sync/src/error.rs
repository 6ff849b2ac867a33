//! Error types for shadow synchronization

use fc_01_correlator::CorrelatorError;
use shared_bus::TransportError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShadowError {
    /// The shadow does not exist (read rejected with 404).
    #[error("Shadow not found")]
    NotFound,

    /// The backend rejected a read or write for another reason.
    #[error("Shadow request rejected (code {code}): {message}")]
    Rejected { code: u16, message: String },

    /// An accepted read did not contain a shadow document.
    #[error("Malformed shadow document: {0}")]
    Malformed(String),

    #[error("Correlator error: {0}")]
    Correlator(#[from] CorrelatorError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Report encoding failed: {0}")]
    Encode(String),
}

pub type ShadowResult<T> = Result<T, ShadowError>;
