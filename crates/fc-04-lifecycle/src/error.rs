//! Error types for the lifecycle runtime

use fc_02_shadow_sync::ShadowError;
use shared_bus::TransportError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Shadow error: {0}")]
    Shadow(#[from] ShadowError),

    /// `start` was called twice or after `shutdown`.
    #[error("Lifecycle already started")]
    AlreadyStarted,
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
