//! Runtime errors.

use crate::config::ConfigError;
use fc_03_provisioning::ProvisioningError;
use fc_04_lifecycle::LifecycleError;
use shared_bus::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
