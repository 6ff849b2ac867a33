//! # Device Runtime
//!
//! Wires configuration, the link factory and the credential store into the
//! two long-running modes of the device: credential rotation and the
//! lifecycle runtime.

use crate::config::DeviceConfig;
use crate::error::RuntimeResult;
use fc_03_provisioning::{CredentialStore, RotationReport, RotationWorkflow};
use fc_04_lifecycle::LifecycleMachine;
use shared_bus::{ConnectOptions, LinkFactory, TransportSession};
use shared_types::{CredentialRef, IssuedCredential, LifecycleState};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

pub struct DeviceRuntime {
    config: DeviceConfig,
    links: Arc<dyn LinkFactory>,
    store: Arc<dyn CredentialStore>,
}

impl DeviceRuntime {
    pub fn new(
        config: DeviceConfig,
        links: Arc<dyn LinkFactory>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            links,
            store,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Rotate from the claim credential to a registered production
    /// identity and verify it. `resume` re-submits a previously issued
    /// bundle instead of requesting a new one.
    ///
    /// The returned report describes failures of the rotation itself.
    ///
    /// # Errors
    ///
    /// `Provisioning` if the claim credential cannot be loaded.
    pub async fn provision(&self, resume: Option<IssuedCredential>) -> RuntimeResult<RotationReport> {
        let claim_ref = self.config.identity.claim_ref();
        let claim = self.store.load(&claim_ref).await?;

        let workflow = RotationWorkflow::new(
            Arc::clone(&self.links),
            Arc::clone(&self.store),
            claim_ref,
            claim,
            self.config.rotation_config(),
        );
        info!(
            client_id = workflow.claim_client_id(),
            template = %self.config.provisioning.template_name,
            resume = resume.is_some(),
            "Starting credential rotation"
        );

        Ok(workflow.run(resume).await)
    }

    /// Session for the production identity. The client id is the device
    /// name.
    ///
    /// # Errors
    ///
    /// `Provisioning` if the credential cannot be loaded.
    pub async fn production_session(
        &self,
        device_name: &str,
        credential: &CredentialRef,
    ) -> RuntimeResult<Arc<TransportSession>> {
        let credential = self.store.load(credential).await?;
        let options = ConnectOptions::new(device_name)
            .with_credential(credential)
            .with_keep_alive(self.config.broker.keep_alive);
        Ok(Arc::new(TransportSession::new(
            self.links.create_link(),
            options,
            self.config.broker.session_config(),
        )))
    }

    /// Run the lifecycle state machine until `shutdown` resolves, then
    /// announce `offline` and disconnect.
    ///
    /// Returns the state the machine ended in.
    ///
    /// # Errors
    ///
    /// `Provisioning` if the credential cannot be loaded, `Lifecycle` if
    /// startup or the final disconnect fails.
    pub async fn run_lifecycle(
        &self,
        device_name: &str,
        credential: &CredentialRef,
        shutdown: impl Future<Output = ()>,
    ) -> RuntimeResult<LifecycleState> {
        let session = self.production_session(device_name, credential).await?;
        let machine = LifecycleMachine::new(session, self.config.lifecycle_config(device_name));

        if let Err(err) = machine.start().await {
            error!(device = device_name, error = %err, "Lifecycle startup failed");
            if let Err(cleanup) = machine.shutdown().await {
                error!(error = %cleanup, "Cleanup after failed startup failed");
            }
            return Err(err.into());
        }

        shutdown.await;
        info!(device = device_name, "Shutdown requested");

        machine.shutdown().await?;
        let stats = machine.stats();
        info!(
            transitions = stats.transitions(),
            status_published = stats.status_published(),
            ignored_commands = stats.ignored_commands(),
            "Lifecycle runtime stopped"
        );
        Ok(machine.state().await)
    }
}
