//! # In-Memory Broker
//!
//! A single-process broker with the MQTT behaviors the runtime depends on:
//! acknowledged subscribe/publish, wildcard routing, retained messages,
//! last wills and certificate-based admission. Used by tests and by the
//! `--loopback` runtime mode.

use crate::filter::TopicFilter;
use crate::link::{
    BrokerLink, ConnectOptions, ConnectReturnCode, LinkError, LinkEvent, LinkFactory, PacketId,
};
use crate::message::{InboundMessage, LastWill, OutboundMessage, QoS};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct ClientEntry {
    session_id: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    subscriptions: Vec<TopicFilter>,
    will: Option<LastWill>,
}

#[derive(Default)]
struct BrokerState {
    clients: HashMap<String, ClientEntry>,
    retained: BTreeMap<String, InboundMessage>,
    trusted: HashSet<String>,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    require_trusted: AtomicBool,
    next_session: AtomicU64,
    messages_routed: AtomicU64,
}

/// Shared handle to one in-memory broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                require_trusted: AtomicBool::new(false),
                next_session: AtomicU64::new(1),
                messages_routed: AtomicU64::new(0),
            }),
        }
    }

    /// When enabled, connections must present a credential whose
    /// certificate fingerprint was registered with [`Self::trust_certificate`].
    pub fn require_trusted_credentials(&self, required: bool) {
        self.inner.require_trusted.store(required, Ordering::SeqCst);
    }

    pub fn trust_certificate(&self, fingerprint: impl Into<String>) {
        self.inner.state.lock().trusted.insert(fingerprint.into());
    }

    pub fn revoke_certificate(&self, fingerprint: &str) -> bool {
        self.inner.state.lock().trusted.remove(fingerprint)
    }

    /// A new, unconnected client link.
    #[must_use]
    pub fn link(&self) -> LoopbackLink {
        LoopbackLink {
            broker: self.clone(),
            session: Mutex::new(None),
        }
    }

    /// Drop a client without a DISCONNECT, as a network failure would.
    /// Its last will, if any, is published. Returns false if the client
    /// was not connected.
    pub fn sever(&self, client_id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.clients.remove(client_id) else {
            return false;
        };
        let _ = entry.events.send(LinkEvent::Disconnected {
            reason: "connection severed".to_string(),
        });
        warn!(client_id, "Client connection severed");

        if let Some(will) = entry.will {
            debug!(client_id, topic = %will.topic, "Publishing last will");
            self.route(&mut state, &will.to_outbound());
        }
        true
    }

    /// Publish from outside any client session.
    pub fn inject(&self, message: OutboundMessage) {
        let mut state = self.inner.state.lock();
        self.route(&mut state, &message);
    }

    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<InboundMessage> {
        self.inner.state.lock().retained.get(topic).cloned()
    }

    #[must_use]
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.inner.state.lock().clients.contains_key(client_id)
    }

    #[must_use]
    pub fn connected_clients(&self) -> Vec<String> {
        let mut clients: Vec<String> = self.inner.state.lock().clients.keys().cloned().collect();
        clients.sort();
        clients
    }

    /// Total messages accepted for routing (client publishes, wills, injects).
    #[must_use]
    pub fn messages_routed(&self) -> u64 {
        self.inner.messages_routed.load(Ordering::Relaxed)
    }

    fn admit(&self, state: &BrokerState, options: &ConnectOptions) -> ConnectReturnCode {
        if !self.inner.require_trusted.load(Ordering::SeqCst) {
            return ConnectReturnCode::Accepted;
        }
        match &options.credential {
            None => ConnectReturnCode::BadCredentials,
            Some(credential) if state.trusted.contains(&credential.fingerprint()) => {
                ConnectReturnCode::Accepted
            }
            Some(_) => ConnectReturnCode::NotAuthorized,
        }
    }

    fn route(&self, state: &mut BrokerState, message: &OutboundMessage) {
        self.inner.messages_routed.fetch_add(1, Ordering::Relaxed);

        if message.retain {
            if message.payload.is_empty() {
                state.retained.remove(&message.topic);
            } else {
                let mut stored = message.to_inbound();
                stored.retained = true;
                state.retained.insert(message.topic.clone(), stored);
            }
        }

        let delivery = message.to_inbound();
        for (client_id, entry) in &state.clients {
            if entry
                .subscriptions
                .iter()
                .any(|filter| filter.matches(&message.topic))
                && entry.events.send(LinkEvent::Publish(delivery.clone())).is_err()
            {
                debug!(client_id = %client_id, "Dropping delivery to closed client");
            }
        }
    }

    fn session_entry<'a>(
        state: &'a mut BrokerState,
        session: Option<&(String, u64)>,
    ) -> Result<&'a mut ClientEntry, LinkError> {
        let (client_id, session_id) = session.ok_or(LinkError::NotConnected)?;
        state
            .clients
            .get_mut(client_id)
            .filter(|entry| entry.session_id == *session_id)
            .ok_or(LinkError::NotConnected)
    }
}

impl LinkFactory for InMemoryBroker {
    fn create_link(&self) -> Arc<dyn BrokerLink> {
        Arc::new(self.link())
    }
}

/// Client side of an [`InMemoryBroker`] connection.
pub struct LoopbackLink {
    broker: InMemoryBroker,
    /// `(client_id, session_id)` of the live connection.
    session: Mutex<Option<(String, u64)>>,
}

#[async_trait]
impl BrokerLink for LoopbackLink {
    async fn open(
        &self,
        options: &ConnectOptions,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, LinkError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.broker.inner.state.lock();

        let code = self.broker.admit(&state, options);
        if code != ConnectReturnCode::Accepted {
            warn!(client_id = %options.client_id, %code, "Connection refused");
            let _ = tx.send(LinkEvent::ConnAck { code });
            return Ok(rx);
        }

        let session_id = self.broker.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let entry = ClientEntry {
            session_id,
            events: tx.clone(),
            subscriptions: Vec::new(),
            will: options.last_will.clone(),
        };
        if let Some(previous) = state.clients.insert(options.client_id.clone(), entry) {
            let _ = previous.events.send(LinkEvent::Disconnected {
                reason: "session taken over".to_string(),
            });
        }
        *self.session.lock() = Some((options.client_id.clone(), session_id));

        info!(client_id = %options.client_id, "Client connected");
        let _ = tx.send(LinkEvent::ConnAck {
            code: ConnectReturnCode::Accepted,
        });
        Ok(rx)
    }

    async fn subscribe(
        &self,
        packet_id: PacketId,
        filters: &[(String, QoS)],
    ) -> Result<(), LinkError> {
        let session = self.session.lock().clone();
        let mut state = self.broker.inner.state.lock();

        let mut granted = Vec::with_capacity(filters.len());
        let mut added = Vec::new();
        {
            let entry = InMemoryBroker::session_entry(&mut state, session.as_ref())?;
            for (raw, qos) in filters {
                match TopicFilter::parse(raw) {
                    Ok(filter) => {
                        if !entry.subscriptions.contains(&filter) {
                            entry.subscriptions.push(filter.clone());
                        }
                        added.push(filter);
                        granted.push(Some(*qos));
                    }
                    Err(err) => {
                        warn!(filter = %raw, error = %err, "Refusing subscription");
                        granted.push(None);
                    }
                }
            }
        }

        let replay: Vec<InboundMessage> = state
            .retained
            .values()
            .filter(|message| added.iter().any(|filter| filter.matches(&message.topic)))
            .cloned()
            .collect();

        let entry = InMemoryBroker::session_entry(&mut state, session.as_ref())?;
        let _ = entry.events.send(LinkEvent::SubAck { packet_id, granted });
        for message in replay {
            let _ = entry.events.send(LinkEvent::Publish(message));
        }
        Ok(())
    }

    async fn publish(
        &self,
        packet_id: PacketId,
        message: OutboundMessage,
    ) -> Result<(), LinkError> {
        let session = self.session.lock().clone();
        let mut state = self.broker.inner.state.lock();

        let events = InMemoryBroker::session_entry(&mut state, session.as_ref())?
            .events
            .clone();
        self.broker.route(&mut state, &message);

        if message.qos == QoS::AtLeastOnce {
            let _ = events.send(LinkEvent::PubAck { packet_id });
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        let Some((client_id, session_id)) = self.session.lock().take() else {
            return Ok(());
        };
        let mut state = self.broker.inner.state.lock();
        let owned = state
            .clients
            .get(&client_id)
            .is_some_and(|entry| entry.session_id == session_id);
        if owned {
            state.clients.remove(&client_id);
            info!(client_id = %client_id, "Client disconnected");
        }
        Ok(())
    }
}
