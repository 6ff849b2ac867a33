//! Error types for the rotation workflow

use fc_01_correlator::CorrelatorError;
use fc_02_shadow_sync::ShadowError;
use shared_bus::TransportError;
use shared_types::{PayloadError, Rejection};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisioningError {
    /// An accepted outcome lacked a required field. Not retryable.
    #[error("Malformed {step} response: {reason}")]
    MalformedResponse { step: &'static str, reason: String },

    /// The backend refused to issue a credential.
    #[error("Credential issue rejected (code {code}): {message}")]
    CredentialIssueRejected { code: u16, message: String },

    /// The backend refused the registration. The ownership token must not
    /// be resubmitted blindly.
    #[error("Registration rejected (code {code}): {message}")]
    RegistrationRejected { code: u16, message: String },

    /// Shadow verification was rejected with something other than a
    /// recoverable 404.
    #[error("Shadow rejected (code {code}): {message}")]
    ShadowRejected { code: u16, message: String },

    /// Credential material could not be written or read.
    #[error("Credential persistence failed: {0}")]
    Persistence(String),

    /// Identity bookkeeping refused a transition.
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    #[error("Correlator error: {0}")]
    Correlator(#[from] CorrelatorError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ProvisioningError {
    pub(crate) fn malformed(step: &'static str, err: PayloadError) -> Self {
        ProvisioningError::MalformedResponse {
            step,
            reason: err.to_string(),
        }
    }

    pub(crate) fn registration_rejected(rejection: Rejection) -> Self {
        ProvisioningError::RegistrationRejected {
            code: rejection.code,
            message: rejection.message,
        }
    }
}

impl From<ShadowError> for ProvisioningError {
    fn from(err: ShadowError) -> Self {
        match err {
            ShadowError::NotFound => ProvisioningError::ShadowRejected {
                code: shared_types::NOT_FOUND_CODE,
                message: "shadow still missing after bootstrap".to_string(),
            },
            ShadowError::Rejected { code, message } => {
                ProvisioningError::ShadowRejected { code, message }
            }
            ShadowError::Malformed(reason) => ProvisioningError::MalformedResponse {
                step: "shadow get",
                reason,
            },
            ShadowError::Correlator(err) => ProvisioningError::Correlator(err),
            ShadowError::Transport(err) => ProvisioningError::Transport(err),
            ShadowError::Encode(reason) => {
                ProvisioningError::Correlator(CorrelatorError::Encode(reason))
            }
        }
    }
}

pub type ProvisioningResult<T> = Result<T, ProvisioningError>;
