//! Fixtures shared by the scenario tests.

use device_runtime::{LoopbackBackend, LoopbackConfig};
use fc_03_provisioning::RotationConfig;
use shared_bus::{
    ConnectOptions, InMemoryBroker, InboundMessage, MessageSubscription, SessionConfig,
    TransportSession,
};
use shared_types::ClientCredential;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub const SHADOW: &str = "robot";

/// A credential-enforcing broker with the loopback backend attached.
pub struct Fleet {
    pub broker: InMemoryBroker,
    pub backend: LoopbackBackend,
}

impl Fleet {
    pub async fn start() -> Self {
        Self::start_with(LoopbackConfig::default()).await
    }

    pub async fn start_with(config: LoopbackConfig) -> Self {
        let broker = InMemoryBroker::new();
        broker.require_trusted_credentials(true);
        let backend = LoopbackBackend::new(broker.clone(), config);
        backend.start().await.expect("backend starts");
        Self { broker, backend }
    }

    pub fn session(&self, client_id: &str, credential: ClientCredential) -> Arc<TransportSession> {
        Arc::new(TransportSession::new(
            Arc::new(self.broker.link()),
            ConnectOptions::new(client_id).with_credential(credential),
            SessionConfig::default(),
        ))
    }

    /// A connected client watching `topics`.
    pub async fn observer(&self, topics: &[&str]) -> (Arc<TransportSession>, MessageSubscription) {
        let observer = self.session("observer", self.backend.issue_claim_credential());
        observer.connect().await.expect("observer connects");
        let inbox = observer.subscribe_messages(topics).expect("valid filters");
        observer.subscribe(topics).await.expect("observer subscribes");
        (observer, inbox)
    }
}

pub fn rotation_config() -> RotationConfig {
    RotationConfig {
        reconnect_delay: Duration::ZERO,
        ..RotationConfig::default()
    }
}

pub async fn next_message(inbox: &mut MessageSubscription) -> InboundMessage {
    timeout(Duration::from_secs(60), inbox.recv())
        .await
        .expect("message in time")
        .expect("open subscription")
}
