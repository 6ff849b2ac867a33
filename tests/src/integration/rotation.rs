//! Claim credential → registered production identity.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{rotation_config, Fleet, SHADOW};
    use fc_03_provisioning::{
        CredentialStore, FileCredentialStore, ProvisioningError, RotationStage, RotationWorkflow,
    };
    use shared_bus::{TransportError, TransportSession};
    use shared_types::{ClientCredential, CredentialRef, IdentityStage};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Claim credential written to disk the way it ships on a device.
    fn install_claim(dir: &Path, claim: &ClientCredential) -> CredentialRef {
        let reference = CredentialRef::new(dir.join("claim.crt"), dir.join("claim.key"));
        fs::write(&reference.certificate_path, &claim.certificate_pem).unwrap();
        fs::write(&reference.private_key_path, &claim.private_key_pem).unwrap();
        reference
    }

    fn workflow(fleet: &Fleet, dir: &TempDir, claim: ClientCredential) -> RotationWorkflow {
        let claim_ref = install_claim(dir.path(), &claim);
        let store = FileCredentialStore::new(dir.path().join("production"));
        RotationWorkflow::new(
            Arc::new(fleet.broker.clone()),
            Arc::new(store),
            claim_ref,
            claim,
            rotation_config(),
        )
    }

    #[tokio::test]
    async fn test_full_rotation_to_verified_identity() {
        let fleet = Fleet::start().await;
        let dir = TempDir::new().unwrap();
        let workflow = workflow(&fleet, &dir, fleet.backend.issue_claim_credential());

        let report = workflow.run(None).await;

        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.stage, RotationStage::Verified);
        assert_eq!(report.device_name.as_deref(), Some("AMR-001"));
        assert_eq!(report.echo_verified, Some(true));
        assert!(report.shadow_bootstrapped);

        let credential = report.credential.clone().unwrap();
        assert!(credential.private_key_path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&credential.private_key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let identities = workflow.identities();
        let active = identities.active().unwrap();
        assert_eq!(active.device_name, "AMR-001");
        assert_eq!(active.stage, IdentityStage::Active);
        assert!(identities.candidate().is_none());

        // The persisted production credential is now accepted on its own.
        let production = FileCredentialStore::new(dir.path().join("production"))
            .load(&credential)
            .await
            .unwrap();
        let session: Arc<TransportSession> = fleet.session("AMR-001", production);
        session.connect().await.unwrap();
        assert!(fleet.backend.shadow("AMR-001", SHADOW).is_some());
    }

    #[tokio::test]
    async fn test_untrusted_claim_fails_before_issue() {
        let fleet = Fleet::start().await;
        let dir = TempDir::new().unwrap();
        let stranger = ClientCredential::new("CERT-unknown", "KEY-unknown");
        let workflow = workflow(&fleet, &dir, stranger);

        let report = workflow.run(None).await;

        assert_eq!(report.stage, RotationStage::Failed);
        assert_eq!(report.last_completed, RotationStage::Start);
        assert!(matches!(
            report.error,
            Some(ProvisioningError::Transport(TransportError::Connection { .. }))
        ));
        assert!(report.issued.is_none());
        assert!(fleet.backend.registered_devices().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_registration_keeps_credential_and_resumes() {
        let fleet = Fleet::start().await;
        fleet.backend.reject_registrations(Some(409));
        let dir = TempDir::new().unwrap();
        let claim = fleet.backend.issue_claim_credential();

        let failed = workflow(&fleet, &dir, claim.clone()).provision(None).await;

        assert_eq!(failed.stage, RotationStage::Failed);
        assert_eq!(failed.last_completed, RotationStage::CredentialIssued);
        assert!(matches!(
            failed.error,
            Some(ProvisioningError::RegistrationRejected { code: 409, .. })
        ));
        let kept = failed.credential.clone().unwrap();
        assert!(kept.certificate_path.exists());
        assert!(kept.private_key_path.exists());
        let issued = failed.issued.clone().unwrap();

        // Restart with the same bundle once the backend accepts again.
        fleet.backend.reject_registrations(None);
        let resumed = workflow(&fleet, &dir, claim).provision(Some(issued.clone())).await;

        assert!(resumed.is_success(), "{:?}", resumed.error);
        assert_eq!(resumed.stage, RotationStage::Registered);
        assert_eq!(resumed.device_name.as_deref(), Some("AMR-001"));
        assert_eq!(resumed.issued.unwrap().fingerprint(), issued.fingerprint());
        assert_eq!(fleet.backend.registered_devices(), vec!["AMR-001".to_string()]);
    }

    #[tokio::test]
    async fn test_issued_bundle_survives_restart_on_disk() {
        let fleet = Fleet::start().await;
        fleet.backend.reject_registrations(Some(500));
        let dir = TempDir::new().unwrap();
        let files = FileCredentialStore::new(dir.path().join("production"));

        let failed = workflow(&fleet, &dir, fleet.backend.issue_claim_credential())
            .provision(None)
            .await;
        files.save_issued(failed.issued.as_ref().unwrap()).unwrap();

        let restored = files.load_issued().unwrap().unwrap();
        assert_eq!(restored, failed.issued.unwrap());
        files.clear_issued().unwrap();
        assert!(files.load_issued().unwrap().is_none());
    }
}
