//! # Rotation Workflow Service

use crate::domain::identities::DeviceIdentities;
use crate::domain::report::RotationReport;
use crate::domain::stage::RotationStage;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::ports::CredentialStore;
use fc_01_correlator::Correlator;
use fc_02_shadow_sync::{ShadowConfig, ShadowSynchronizer};
use parking_lot::Mutex;
use serde_json::json;
use shared_bus::{ConnectOptions, LinkFactory, SessionConfig, TransportSession};
use shared_types::{
    now_secs, ClientCredential, CredentialRef, Identity, IdentityStage, IssuedCredential,
    RegistrationAccepted, RegistrationRequest, TopicScheme,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// `msg` field of the self-echo payload.
pub const ECHO_MARKER: &str = "cert-rotation-verify";

/// Rotation parameters.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub topics: TopicScheme,
    /// Provisioning template. Default: `amr-prod-template`.
    pub template_name: String,
    /// Named shadow read during verification. Default: `robot`.
    pub shadow_name: String,
    /// Caller-supplied device name; used when the backend assigns none.
    pub device_name: Option<String>,
    /// Registration parameters sent with the ownership token.
    pub attributes: BTreeMap<String, String>,
    /// Default: 20s.
    pub create_timeout: Duration,
    /// Default: 30s.
    pub register_timeout: Duration,
    /// Default: 20s.
    pub shadow_timeout: Duration,
    /// Default: 10s.
    pub echo_timeout: Duration,
    /// Run the self-echo check after the shadow read. Default: true.
    pub verify_echo: bool,
    /// Pause between closing the claim session and reconnecting.
    /// Default: 1s.
    pub reconnect_delay: Duration,
    pub session: SessionConfig,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            topics: TopicScheme::default(),
            template_name: "amr-prod-template".to_string(),
            shadow_name: "robot".to_string(),
            device_name: None,
            attributes: BTreeMap::new(),
            create_timeout: Duration::from_secs(20),
            register_timeout: Duration::from_secs(30),
            shadow_timeout: Duration::from_secs(20),
            echo_timeout: Duration::from_secs(10),
            verify_echo: true,
            reconnect_delay: Duration::from_secs(1),
            session: SessionConfig::default(),
        }
    }
}

/// Drives one device from the claim credential to a verified production
/// credential.
pub struct RotationWorkflow {
    links: Arc<dyn LinkFactory>,
    store: Arc<dyn CredentialStore>,
    claim: ClientCredential,
    claim_client_id: String,
    config: RotationConfig,
    identities: Mutex<DeviceIdentities>,
}

impl RotationWorkflow {
    pub fn new(
        links: Arc<dyn LinkFactory>,
        store: Arc<dyn CredentialStore>,
        claim_ref: CredentialRef,
        claim: ClientCredential,
        config: RotationConfig,
    ) -> Self {
        let claim_client_id = claim_client_id();
        let bootstrap = Identity::new(claim_client_id.clone(), IdentityStage::Bootstrap, claim_ref);
        Self {
            links,
            store,
            claim,
            claim_client_id,
            config,
            identities: Mutex::new(DeviceIdentities::new(bootstrap)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Client id of the claim session (`claim-<8 hex>`).
    #[must_use]
    pub fn claim_client_id(&self) -> &str {
        &self.claim_client_id
    }

    /// Snapshot of the identity bookkeeping.
    #[must_use]
    pub fn identities(&self) -> DeviceIdentities {
        self.identities.lock().clone()
    }

    fn open_session(&self, client_id: &str, credential: ClientCredential) -> Arc<TransportSession> {
        let options = ConnectOptions::new(client_id).with_credential(credential);
        Arc::new(TransportSession::new(
            self.links.create_link(),
            options,
            self.config.session.clone(),
        ))
    }

    /// Full rotation: [`Self::provision`] then [`Self::verify`].
    pub async fn run(&self, resume: Option<IssuedCredential>) -> RotationReport {
        let provisioned = self.provision(resume).await;
        if !provisioned.is_success() {
            return provisioned;
        }
        let (Some(device_name), Some(credential)) =
            (provisioned.device_name.clone(), provisioned.credential.clone())
        else {
            return provisioned;
        };

        let mut verified = self.verify(&device_name, &credential).await;
        verified.issued = provisioned.issued;
        verified
    }

    /// Steps 1-3 on the claim credential. Ends in `Registered` or `Failed`.
    ///
    /// `resume` reuses an issued but unregistered credential instead of
    /// requesting a new one.
    pub async fn provision(&self, resume: Option<IssuedCredential>) -> RotationReport {
        let mut report = RotationReport::start();
        let session = self.open_session(&self.claim_client_id, self.claim.clone());

        let result = self.provision_steps(&session, &mut report, resume).await;
        if let Err(err) = session.disconnect().await {
            warn!(error = %err, "Claim session did not close cleanly");
        }
        if result.is_err() {
            self.identities.lock().fail_candidate();
        }
        report.finish(result)
    }

    async fn provision_steps(
        &self,
        session: &Arc<TransportSession>,
        report: &mut RotationReport,
        resume: Option<IssuedCredential>,
    ) -> ProvisioningResult<()> {
        // Step 1: claim session with both outcome pairs subscribed.
        session.connect().await?;
        let correlator = Correlator::new(Arc::clone(session));
        let create = self.config.topics.create_credential();
        let register = self.config.topics.register_identity(&self.config.template_name);
        correlator
            .prepare(&[&create.outcomes, &register.outcomes])
            .await?;
        report.advance(RotationStage::BootstrapConnected);

        // Step 2: obtain and persist the candidate credential.
        let issued = match resume {
            Some(issued) => {
                info!(fingerprint = %issued.fingerprint(), "Resuming with issued credential");
                issued
            }
            None => {
                let outcome = correlator
                    .call(&create, &json!({}), self.config.create_timeout)
                    .await?;
                let payload = outcome.into_accepted().map_err(|rejection| {
                    ProvisioningError::CredentialIssueRejected {
                        code: rejection.code,
                        message: rejection.message,
                    }
                })?;
                IssuedCredential::from_response(&payload)
                    .map_err(|err| ProvisioningError::malformed("create credential", err))?
            }
        };
        report.issued = Some(issued.clone());

        let credential = self.store.persist(&issued).await?;
        report.credential = Some(credential.clone());
        let provisional_name = self
            .config
            .device_name
            .clone()
            .unwrap_or_else(|| self.claim_client_id.clone());
        self.identities
            .lock()
            .stage_candidate(&provisional_name, credential)?;
        report.advance(RotationStage::CredentialIssued);

        // Step 3: bind the credential to a device identity.
        let request = RegistrationRequest::new(
            issued.ownership_token.clone(),
            &self.config.attributes,
            self.config.device_name.as_deref(),
        );
        let outcome = correlator
            .call(&register, &request, self.config.register_timeout)
            .await?;
        let payload = outcome
            .into_accepted()
            .map_err(ProvisioningError::registration_rejected)?;
        let accepted = RegistrationAccepted::from_response(&payload)
            .map_err(|err| ProvisioningError::malformed("registration", err))?;
        let device_name = accepted
            .resolve_device_name(request.requested_name())
            .ok_or_else(|| ProvisioningError::MalformedResponse {
                step: "registration",
                reason: "no thingName and no configured device name".to_string(),
            })?;

        self.identities.lock().name_candidate(&device_name);
        info!(device = %device_name, "Device registered");
        report.device_name = Some(device_name);
        report.advance(RotationStage::Registered);
        Ok(())
    }

    /// Step 4: reconnect as `device_name` with the persisted credential and
    /// confirm it works. Ends in `Verified` or `Failed`.
    pub async fn verify(&self, device_name: &str, credential: &CredentialRef) -> RotationReport {
        let mut report = RotationReport::registered(device_name, credential);

        let client = match self.store.load(credential).await {
            Ok(client) => client,
            Err(err) => return report.finish(Err(err)),
        };
        if !self.config.reconnect_delay.is_zero() {
            tokio::time::sleep(self.config.reconnect_delay).await;
        }

        let session = self.open_session(device_name, client);
        let result = self.verify_steps(&session, device_name, &mut report).await;
        if let Err(err) = session.disconnect().await {
            warn!(error = %err, "Verification session did not close cleanly");
        }

        match &result {
            Ok(()) => {
                self.identities.lock().activate(device_name, credential);
            }
            Err(_) => self.identities.lock().fail_candidate(),
        }
        report.finish(result)
    }

    async fn verify_steps(
        &self,
        session: &Arc<TransportSession>,
        device_name: &str,
        report: &mut RotationReport,
    ) -> ProvisioningResult<()> {
        session.connect().await?;

        let shadow = ShadowSynchronizer::new(
            Arc::new(Correlator::new(Arc::clone(session))),
            ShadowConfig {
                device_name: device_name.to_string(),
                shadow_name: self.config.shadow_name.clone(),
                timeout: self.config.shadow_timeout,
                topics: self.config.topics.clone(),
            },
        );
        let synced = shadow.get_or_bootstrap().await?;
        report.shadow_bootstrapped = synced.bootstrapped;
        info!(
            device = device_name,
            bootstrapped = synced.bootstrapped,
            "Shadow read accepted with production credential"
        );

        if self.config.verify_echo {
            report.echo_verified = Some(self.echo_check(session, device_name).await);
        }

        report.advance(RotationStage::Verified);
        Ok(())
    }

    /// Publish a marker to the private verify topic and wait to receive it.
    /// Never fails the workflow.
    async fn echo_check(&self, session: &TransportSession, device_name: &str) -> bool {
        let topic = self.config.topics.verify(device_name);
        let mut echoes = match session.subscribe_messages(&[topic.as_str()]) {
            Ok(echoes) => echoes,
            Err(err) => {
                warn!(error = %err, "Echo check skipped");
                return false;
            }
        };
        let nonce = Uuid::new_v4().simple().to_string();
        let marker = json!({"ts": now_secs(), "msg": ECHO_MARKER, "nonce": nonce});

        let sent = async {
            session.ensure_subscribed(&[topic.as_str()]).await?;
            session.publish_json(&topic, &marker, false).await
        };
        if let Err(err) = sent.await {
            warn!(topic = %topic, error = %err, "Echo marker not sent");
            return false;
        }

        let echoed = timeout(self.config.echo_timeout, async {
            while let Some(message) = echoes.recv().await {
                let Ok(body) = message.json() else { continue };
                if body["msg"] == ECHO_MARKER && body["nonce"] == nonce.as_str() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        if echoed {
            info!(topic = %topic, "Echo received, publish and subscribe authorized");
        } else {
            warn!(topic = %topic, "Echo not confirmed");
        }
        echoed
    }
}

fn claim_client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("claim-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryCredentialStore;
    use serde_json::Value;
    use shared_bus::InMemoryBroker;

    /// Answers create-credential and registration requests.
    async fn provisioning_backend(broker: &InMemoryBroker, create: Value, register: (bool, Value)) {
        let scheme = TopicScheme::default();
        let create_topics = scheme.create_credential();
        let register_topics = scheme.register_identity("amr-prod-template");
        let backend = Arc::new(TransportSession::new(
            Arc::new(broker.link()),
            ConnectOptions::new("backend"),
            SessionConfig::default(),
        ));
        backend.connect().await.unwrap();
        let requests = [
            create_topics.request.as_str(),
            register_topics.request.as_str(),
        ];
        backend.subscribe(&requests).await.unwrap();
        let mut inbox = backend.subscribe_messages(&requests).unwrap();

        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let (topic, body) = if message.topic == create_topics.request {
                    (&create_topics.outcomes.accepted, &create)
                } else if register.0 {
                    (&register_topics.outcomes.accepted, &register.1)
                } else {
                    (&register_topics.outcomes.rejected, &register.1)
                };
                backend.publish_json(topic, body, false).await.unwrap();
            }
        });
    }

    fn workflow(broker: &InMemoryBroker, store: Arc<InMemoryCredentialStore>) -> RotationWorkflow {
        let config = RotationConfig {
            create_timeout: Duration::from_secs(1),
            register_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::ZERO,
            ..RotationConfig::default()
        };
        RotationWorkflow::new(
            Arc::new(broker.clone()),
            store,
            CredentialRef::new("claim.crt", "claim.key"),
            ClientCredential::new("CLAIM", "CLAIM-KEY"),
            config,
        )
    }

    fn accepted_credential() -> Value {
        json!({"certificate": "C", "privateKey": "K", "ownershipToken": "T"})
    }

    #[tokio::test]
    async fn test_provision_registers() {
        let broker = InMemoryBroker::new();
        provisioning_backend(&broker, accepted_credential(), (true, json!({"thingName": "AMR-001"})))
            .await;
        let store = Arc::new(InMemoryCredentialStore::new());
        let workflow = workflow(&broker, Arc::clone(&store));

        let report = workflow.provision(None).await;
        assert_eq!(report.stage, RotationStage::Registered);
        assert_eq!(report.device_name.as_deref(), Some("AMR-001"));

        let credential = report.credential.clone().unwrap();
        assert_eq!(store.get(&credential), Some(ClientCredential::new("C", "K")));
        assert_eq!(
            workflow.identities().candidate().unwrap().device_name,
            "AMR-001"
        );
        assert!(!broker.is_connected(workflow.claim_client_id()));
    }

    #[tokio::test]
    async fn test_registration_rejected_keeps_credential() {
        let broker = InMemoryBroker::new();
        provisioning_backend(&broker, accepted_credential(), (false, json!({"code": 409})))
            .await;
        let store = Arc::new(InMemoryCredentialStore::new());
        let workflow = workflow(&broker, Arc::clone(&store));

        let report = workflow.provision(None).await;
        assert_eq!(report.stage, RotationStage::Failed);
        assert_eq!(report.last_completed, RotationStage::CredentialIssued);
        assert!(matches!(
            report.error,
            Some(ProvisioningError::RegistrationRejected { code: 409, .. })
        ));
        let credential = report.credential.clone().unwrap();
        assert!(store.get(&credential).is_some());
        assert_eq!(report.issued.as_ref().unwrap().ownership_token, "T");
        assert_eq!(
            workflow.identities().candidate().unwrap().stage,
            IdentityStage::Failed
        );
    }

    #[tokio::test]
    async fn test_missing_private_key_is_malformed() {
        let broker = InMemoryBroker::new();
        provisioning_backend(
            &broker,
            json!({"certificate": "C", "ownershipToken": "T"}),
            (true, json!({"thingName": "AMR-001"})),
        )
        .await;
        let store = Arc::new(InMemoryCredentialStore::new());
        let workflow = workflow(&broker, Arc::clone(&store));

        let report = workflow.provision(None).await;
        assert_eq!(report.last_completed, RotationStage::BootstrapConnected);
        assert!(matches!(
            report.error,
            Some(ProvisioningError::MalformedResponse { step: "create credential", .. })
        ));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_aborts_before_registration() {
        let broker = InMemoryBroker::new();
        provisioning_backend(&broker, accepted_credential(), (true, json!({"thingName": "AMR-001"})))
            .await;
        let store = Arc::new(InMemoryCredentialStore::new());
        store.fail_writes(true);
        let workflow = workflow(&broker, Arc::clone(&store));

        let report = workflow.provision(None).await;
        assert!(matches!(report.error, Some(ProvisioningError::Persistence(_))));
        assert_eq!(report.last_completed, RotationStage::BootstrapConnected);
        assert!(report.device_name.is_none());
    }

    #[tokio::test]
    async fn test_resume_skips_credential_request() {
        let broker = InMemoryBroker::new();
        // Issuing would fail; resuming must not ask.
        provisioning_backend(&broker, json!({}), (true, json!({"thingName": "AMR-002"}))).await;
        let store = Arc::new(InMemoryCredentialStore::new());
        let workflow = workflow(&broker, Arc::clone(&store));

        let resume = IssuedCredential::from_response(&accepted_credential()).unwrap();
        let report = workflow.provision(Some(resume)).await;
        assert_eq!(report.stage, RotationStage::Registered);
        assert_eq!(report.device_name.as_deref(), Some("AMR-002"));
    }

    #[tokio::test]
    async fn test_configured_name_used_when_backend_omits_one() {
        let broker = InMemoryBroker::new();
        provisioning_backend(&broker, accepted_credential(), (true, json!({}))).await;
        let store = Arc::new(InMemoryCredentialStore::new());
        let mut workflow = workflow(&broker, store);
        workflow.config.device_name = Some("AMR-009".to_string());

        let report = workflow.provision(None).await;
        assert_eq!(report.device_name.as_deref(), Some("AMR-009"));
    }

    #[tokio::test]
    async fn test_no_name_anywhere_is_malformed() {
        let broker = InMemoryBroker::new();
        provisioning_backend(&broker, accepted_credential(), (true, json!({}))).await;
        let store = Arc::new(InMemoryCredentialStore::new());
        let workflow = workflow(&broker, store);

        let report = workflow.provision(None).await;
        assert!(matches!(
            report.error,
            Some(ProvisioningError::MalformedResponse { step: "registration", .. })
        ));
    }

    #[tokio::test]
    async fn test_claim_refused_fails_at_start() {
        let broker = InMemoryBroker::new();
        broker.require_trusted_credentials(true);
        let workflow = workflow(&broker, Arc::new(InMemoryCredentialStore::new()));

        let report = workflow.provision(None).await;
        assert_eq!(report.stage, RotationStage::Failed);
        assert_eq!(report.last_completed, RotationStage::Start);
        assert!(matches!(report.error, Some(ProvisioningError::Transport(_))));
    }

    #[test]
    fn test_claim_client_id_shape() {
        let id = claim_client_id();
        assert!(id.starts_with("claim-"));
        assert_eq!(id.len(), "claim-".len() + 8);
    }
}
