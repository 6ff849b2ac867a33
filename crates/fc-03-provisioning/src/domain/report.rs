//! Outcome of one workflow run.

use crate::domain::stage::RotationStage;
use crate::error::ProvisioningError;
use shared_types::{CredentialRef, IssuedCredential};
use tracing::{info, warn};

/// What a run achieved. Returned on success and on failure alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Final stage (`Failed` on error).
    pub stage: RotationStage,
    /// Last stage that completed successfully.
    pub last_completed: RotationStage,
    /// Canonical device name, once registered.
    pub device_name: Option<String>,
    /// Persisted production credential. Kept on failure.
    pub credential: Option<CredentialRef>,
    /// Issued bundle, for resuming registration with the same token.
    pub issued: Option<IssuedCredential>,
    /// Self-echo result; `None` when not attempted.
    pub echo_verified: Option<bool>,
    /// True if the shadow had to be created during verification.
    pub shadow_bootstrapped: bool,
    pub error: Option<ProvisioningError>,
}

impl RotationReport {
    pub(crate) fn start() -> Self {
        Self {
            stage: RotationStage::Start,
            last_completed: RotationStage::Start,
            device_name: None,
            credential: None,
            issued: None,
            echo_verified: None,
            shadow_bootstrapped: false,
            error: None,
        }
    }

    /// A run that picks up after registration.
    pub(crate) fn registered(device_name: &str, credential: &CredentialRef) -> Self {
        Self {
            stage: RotationStage::Registered,
            last_completed: RotationStage::Registered,
            device_name: Some(device_name.to_string()),
            credential: Some(credential.clone()),
            ..Self::start()
        }
    }

    pub(crate) fn advance(&mut self, stage: RotationStage) {
        info!(from = %self.stage, to = %stage, "Rotation stage completed");
        self.stage = stage;
        self.last_completed = stage;
    }

    pub(crate) fn finish(mut self, result: Result<(), ProvisioningError>) -> Self {
        if let Err(err) = result {
            warn!(
                last_completed = %self.last_completed,
                error = %err,
                "Rotation failed"
            );
            self.stage = RotationStage::Failed;
            self.error = Some(err);
        }
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.stage != RotationStage::Failed
    }

    /// # Errors
    ///
    /// The failure cause, if the run failed.
    pub fn into_result(self) -> Result<Self, ProvisioningError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
