//! Identity bookkeeping for one device.
//!
//! Holds the bootstrap identity, at most one candidate and at most one
//! active identity. A candidate becomes active only after verification.

use crate::error::{ProvisioningError, ProvisioningResult};
use shared_types::{CredentialRef, Identity, IdentityStage};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentities {
    bootstrap: Identity,
    candidate: Option<Identity>,
    active: Option<Identity>,
}

impl DeviceIdentities {
    pub fn new(bootstrap: Identity) -> Self {
        Self {
            bootstrap,
            candidate: None,
            active: None,
        }
    }

    #[must_use]
    pub fn bootstrap(&self) -> &Identity {
        &self.bootstrap
    }

    #[must_use]
    pub fn candidate(&self) -> Option<&Identity> {
        self.candidate.as_ref()
    }

    #[must_use]
    pub fn active(&self) -> Option<&Identity> {
        self.active.as_ref()
    }

    /// Record a freshly issued credential. A failed candidate may be
    /// replaced; a live one may not.
    ///
    /// # Errors
    ///
    /// `IdentityConflict` while another candidate is mid-rotation.
    pub fn stage_candidate(
        &mut self,
        device_name: &str,
        credential: CredentialRef,
    ) -> ProvisioningResult<()> {
        if let Some(existing) = &self.candidate {
            if existing.stage == IdentityStage::Candidate && existing.credential != credential {
                return Err(ProvisioningError::IdentityConflict(format!(
                    "candidate {} is still pending",
                    existing.device_name
                )));
            }
        }
        debug!(device = device_name, "Candidate identity staged");
        self.candidate = Some(Identity::new(
            device_name,
            IdentityStage::Candidate,
            credential,
        ));
        Ok(())
    }

    /// Bind the candidate to its backend-assigned name.
    pub fn name_candidate(&mut self, device_name: &str) {
        if let Some(candidate) = self.candidate.as_mut() {
            candidate.device_name = device_name.to_string();
        }
    }

    /// Make the identity using `credential` active. The candidate is
    /// promoted if it matches; the previous active identity is replaced.
    pub fn activate(&mut self, device_name: &str, credential: &CredentialRef) -> &Identity {
        let matches_candidate = self
            .candidate
            .as_ref()
            .is_some_and(|candidate| &candidate.credential == credential);
        if matches_candidate {
            self.candidate = None;
        }
        debug!(device = device_name, "Identity activated");
        self.active.insert(Identity::new(
            device_name,
            IdentityStage::Active,
            credential.clone(),
        ))
    }

    /// Mark the pending candidate as failed.
    pub fn fail_candidate(&mut self) {
        if let Some(candidate) = self.candidate.as_mut() {
            candidate.stage = IdentityStage::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bootstrap() -> Identity {
        Identity::new(
            "claim-0a1b2c3d",
            IdentityStage::Bootstrap,
            CredentialRef::new("claim.crt", "claim.key"),
        )
    }

    fn production() -> CredentialRef {
        CredentialRef::new("prod.crt", "prod.key")
    }

    #[test]
    fn test_candidate_promoted_after_activation() {
        let mut identities = DeviceIdentities::new(bootstrap());
        identities.stage_candidate("pending", production()).unwrap();
        identities.name_candidate("AMR-001");
        assert_eq!(identities.candidate().unwrap().device_name, "AMR-001");
        assert!(identities.active().is_none());

        let active = identities.activate("AMR-001", &production());
        assert!(active.is_active());
        assert!(identities.candidate().is_none());
        assert_eq!(identities.bootstrap().stage, IdentityStage::Bootstrap);
    }

    #[test]
    fn test_single_live_candidate() {
        let mut identities = DeviceIdentities::new(bootstrap());
        identities.stage_candidate("a", production()).unwrap();
        let other = CredentialRef::new("other.crt", "other.key");
        assert!(matches!(
            identities.stage_candidate("b", other.clone()),
            Err(ProvisioningError::IdentityConflict(_))
        ));

        identities.fail_candidate();
        assert_eq!(identities.candidate().unwrap().stage, IdentityStage::Failed);
        identities.stage_candidate("b", other).unwrap();
    }

    #[test]
    fn test_restaging_same_credential_allowed() {
        let mut identities = DeviceIdentities::new(bootstrap());
        identities.stage_candidate("a", production()).unwrap();
        identities.stage_candidate("a", production()).unwrap();
    }

    #[test]
    fn test_at_most_one_active() {
        let mut identities = DeviceIdentities::new(bootstrap());
        identities.activate("AMR-001", &production());
        identities.activate("AMR-001", &CredentialRef::new("next.crt", "next.key"));
        assert_eq!(
            identities.active().unwrap().credential.certificate_path.to_str(),
            Some("next.crt")
        );
    }
}
