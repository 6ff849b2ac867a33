//! # Transport Session
//!
//! One authenticated broker connection. A dispatch task drains the link's
//! events: acknowledgments complete pending operations by packet id, inbound
//! publishes fan out to every [`MessageSubscription`].
//!
//! ```text
//! connect() ──► link.open() ──► [dispatch task] ──ConnAck──► connect() returns
//! publish() ──► pending[id] ──► link.publish()  ──PubAck───► publish() returns
//!                                               ──Publish──► broadcast
//! ```

use crate::error::{TransportError, TransportResult};
use crate::filter::TopicFilter;
use crate::link::{BrokerLink, ConnectOptions, ConnectReturnCode, LinkEvent, PacketId};
use crate::message::{InboundMessage, LastWill, OutboundMessage, QoS};
use crate::subscriber::MessageSubscription;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Acknowledgment deadlines for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait for ConnAck. Default: 20s.
    pub connect_timeout: Duration,
    /// Wait for each SubAck. Default: 5s.
    pub subscribe_timeout: Duration,
    /// Wait for each PubAck. Default: 10s.
    pub publish_timeout: Duration,
    /// Inbound messages buffered per subscriber.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            subscribe_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
            channel_capacity: crate::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Connection state as observed by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, refused, or dropped by the network.
    Disconnected,
    Connecting,
    Connected,
    /// Closed by [`TransportSession::disconnect`].
    Closed,
}

// =============================================================================
// SHARED DISPATCH STATE
// =============================================================================

enum Ack {
    Sub(Vec<Option<QoS>>),
    Pub,
}

struct Shared {
    pending: DashMap<PacketId, oneshot::Sender<Ack>>,
    connack: Mutex<Option<oneshot::Sender<ConnectReturnCode>>>,
    inbound: broadcast::Sender<InboundMessage>,
    state: watch::Sender<ConnectionState>,
    subscribed: Mutex<HashSet<String>>,
    /// Incremented per connect; a dispatcher only touches state while its
    /// generation is current.
    generation: AtomicU64,
}

impl Shared {
    fn complete(&self, packet_id: PacketId, ack: Ack) {
        match self.pending.remove(&packet_id) {
            Some((_, waiter)) => {
                let _ = waiter.send(ack);
            }
            None => trace!(packet_id, "Acknowledgment for unknown packet"),
        }
    }

    fn reset(&self) {
        self.pending.clear();
        self.subscribed.lock().clear();
        self.connack.lock().take();
    }
}

async fn dispatch(
    shared: Arc<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::ConnAck { code } => {
                if let Some(waiter) = shared.connack.lock().take() {
                    let _ = waiter.send(code);
                }
            }
            LinkEvent::SubAck { packet_id, granted } => {
                shared.complete(packet_id, Ack::Sub(granted));
            }
            LinkEvent::PubAck { packet_id } => shared.complete(packet_id, Ack::Pub),
            LinkEvent::Publish(message) => {
                trace!(topic = %message.topic, bytes = message.payload.len(), "Inbound message");
                // No local subscribers is not an error.
                let _ = shared.inbound.send(message);
            }
            LinkEvent::Disconnected { reason } => {
                warn!(%reason, "Broker connection lost");
                break;
            }
        }
    }

    if shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    shared.reset();
    shared.state.send_if_modified(|state| {
        if *state == ConnectionState::Closed || *state == ConnectionState::Disconnected {
            false
        } else {
            *state = ConnectionState::Disconnected;
            true
        }
    });
}

// =============================================================================
// SESSION
// =============================================================================

/// Publish/subscribe session over one [`BrokerLink`].
pub struct TransportSession {
    link: Arc<dyn BrokerLink>,
    options: Mutex<ConnectOptions>,
    config: SessionConfig,
    shared: Arc<Shared>,
    next_packet_id: AtomicU16,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    pub fn new(link: Arc<dyn BrokerLink>, options: ConnectOptions, config: SessionConfig) -> Self {
        let (inbound, _) = broadcast::channel(config.channel_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            link,
            options: Mutex::new(options),
            config,
            shared: Arc::new(Shared {
                pending: DashMap::new(),
                connack: Mutex::new(None),
                inbound,
                state,
                subscribed: Mutex::new(HashSet::new()),
                generation: AtomicU64::new(0),
            }),
            next_packet_id: AtomicU16::new(1),
            dispatcher: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> String {
        self.options.lock().client_id.clone()
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions (e.g. a dropped connection).
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.shared.subscribed.lock().contains(topic)
    }

    /// Number of operations awaiting an acknowledgment.
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.shared.pending.len()
    }

    /// Register the message the broker publishes if this session drops
    /// without a clean disconnect. Retained, at-least-once.
    ///
    /// # Errors
    ///
    /// `LastWillAfterConnect` once the session has started connecting.
    pub fn register_last_will(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> TransportResult<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(TransportError::LastWillAfterConnect);
        }
        let will = LastWill::retained(topic, payload);
        debug!(topic = %will.topic, "Last will registered");
        self.options.lock().last_will = Some(will);
        Ok(())
    }

    /// Open the connection and wait for the broker's acknowledgment.
    /// Connecting an already connected session is a no-op.
    ///
    /// # Errors
    ///
    /// `Connection` when the link cannot open, the broker refuses, or no
    /// acknowledgment arrives within `connect_timeout`.
    pub async fn connect(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.state.send_replace(ConnectionState::Connecting);
        let (ack_tx, ack_rx) = oneshot::channel();
        *self.shared.connack.lock() = Some(ack_tx);

        let options = self.options.lock().clone();
        info!(client_id = %options.client_id, "Connecting to broker");

        let events = match self.link.open(&options).await {
            Ok(events) => events,
            Err(err) => return Err(self.connect_failed(err.to_string())),
        };

        let handle = tokio::spawn(dispatch(Arc::clone(&self.shared), generation, events));
        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }

        let code = match timeout(self.config.connect_timeout, ack_rx).await {
            Ok(Ok(code)) => code,
            Ok(Err(_)) => {
                return Err(self.connect_failed("link closed before acknowledgment".to_string()))
            }
            Err(_) => {
                return Err(self.connect_failed(format!(
                    "no acknowledgment within {:?}",
                    self.config.connect_timeout
                )))
            }
        };

        if code != ConnectReturnCode::Accepted {
            return Err(self.connect_failed(format!("broker refused connection: {code}")));
        }

        self.shared.state.send_replace(ConnectionState::Connected);
        info!(client_id = %options.client_id, "Connected to broker");
        Ok(())
    }

    fn connect_failed(&self, reason: String) -> TransportError {
        warn!(client_id = %self.client_id(), %reason, "Connect failed");
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        self.shared.reset();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        TransportError::Connection { reason }
    }

    fn next_packet_id(&self) -> PacketId {
        loop {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    async fn await_ack(
        &self,
        packet_id: PacketId,
        waiter: oneshot::Receiver<Ack>,
        limit: Duration,
    ) -> Result<Ack, String> {
        match timeout(limit, waiter).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err("connection lost before acknowledgment".to_string()),
            Err(_) => {
                self.shared.pending.remove(&packet_id);
                Err(format!("no acknowledgment within {limit:?}"))
            }
        }
    }

    /// Subscribe to each topic in turn, waiting for every SubAck.
    ///
    /// # Errors
    ///
    /// `Subscribe` naming the first topic that was refused or not
    /// acknowledged in time. Earlier topics stay subscribed.
    pub async fn subscribe(&self, topics: &[&str]) -> TransportResult<()> {
        for topic in topics {
            self.subscribe_one(topic).await?;
        }
        Ok(())
    }

    /// Like [`Self::subscribe`] but skips topics already subscribed on
    /// this connection.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe`].
    pub async fn ensure_subscribed(&self, topics: &[&str]) -> TransportResult<()> {
        for topic in topics {
            if !self.is_subscribed(topic) {
                self.subscribe_one(topic).await?;
            }
        }
        Ok(())
    }

    async fn subscribe_one(&self, topic: &str) -> TransportResult<()> {
        let fail = |reason: String| TransportError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        if !self.is_connected() {
            return Err(fail("session is not connected".to_string()));
        }
        TopicFilter::parse(topic).map_err(|err| fail(err.to_string()))?;

        let packet_id = self.next_packet_id();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(packet_id, tx);

        if let Err(err) = self
            .link
            .subscribe(packet_id, &[(topic.to_string(), QoS::AtLeastOnce)])
            .await
        {
            self.shared.pending.remove(&packet_id);
            return Err(fail(err.to_string()));
        }

        match self
            .await_ack(packet_id, rx, self.config.subscribe_timeout)
            .await
            .map_err(fail)?
        {
            Ack::Sub(granted) if granted.first().copied().flatten().is_some() => {
                self.shared.subscribed.lock().insert(topic.to_string());
                debug!(topic, "Subscribed");
                Ok(())
            }
            Ack::Sub(_) => Err(fail("broker refused subscription".to_string())),
            Ack::Pub => Err(fail("unexpected acknowledgment".to_string())),
        }
    }

    /// Local view of inbound messages matching any of `filters`.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed filter.
    pub fn subscribe_messages(&self, filters: &[&str]) -> TransportResult<MessageSubscription> {
        let parsed = filters
            .iter()
            .map(|raw| {
                TopicFilter::parse(raw).map_err(|err| TransportError::InvalidFilter(err.to_string()))
            })
            .collect::<TransportResult<Vec<_>>>()?;
        Ok(self.subscribe_filters(parsed))
    }

    /// Every inbound message, whatever its topic.
    #[must_use]
    pub fn messages(&self) -> MessageSubscription {
        MessageSubscription::new(self.shared.inbound.subscribe(), Vec::new())
    }

    #[must_use]
    pub fn subscribe_filters(&self, filters: Vec<TopicFilter>) -> MessageSubscription {
        MessageSubscription::new(self.shared.inbound.subscribe(), filters)
    }

    /// Run `handler` for every inbound message matching `filters` until the
    /// session is dropped or the returned task is aborted.
    ///
    /// # Errors
    ///
    /// `InvalidFilter` for a malformed filter.
    pub fn on_message<F>(&self, filters: &[&str], handler: F) -> TransportResult<JoinHandle<()>>
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        let mut subscription = self.subscribe_messages(filters)?;
        Ok(tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                handler(message);
            }
        }))
    }

    /// Publish at-least-once and wait for the broker's PubAck.
    ///
    /// # Errors
    ///
    /// `Publish` when not connected or not acknowledged in time.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        retain: bool,
    ) -> TransportResult<()> {
        self.publish_message(OutboundMessage::new(topic, payload).retained(retain))
            .await
    }

    /// Serialize `value` as JSON and publish it.
    ///
    /// # Errors
    ///
    /// `Encode` if serialization fails, otherwise as [`Self::publish`].
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        value: &T,
        retain: bool,
    ) -> TransportResult<()> {
        let payload =
            serde_json::to_vec(value).map_err(|err| TransportError::Encode(err.to_string()))?;
        self.publish(topic, payload, retain).await
    }

    /// # Errors
    ///
    /// See [`Self::publish`].
    pub async fn publish_message(&self, message: OutboundMessage) -> TransportResult<()> {
        let topic = message.topic.clone();
        let fail = |reason: String| TransportError::Publish {
            topic: topic.clone(),
            reason,
        };

        if !self.is_connected() {
            return Err(fail("session is not connected".to_string()));
        }

        let packet_id = self.next_packet_id();
        if message.qos == QoS::AtMostOnce {
            return self
                .link
                .publish(packet_id, message)
                .await
                .map_err(|err| fail(err.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(packet_id, tx);
        if let Err(err) = self.link.publish(packet_id, message).await {
            self.shared.pending.remove(&packet_id);
            return Err(fail(err.to_string()));
        }

        match self
            .await_ack(packet_id, rx, self.config.publish_timeout)
            .await
            .map_err(fail)?
        {
            Ack::Pub => {
                trace!(topic = %topic, packet_id, "Publish acknowledged");
                Ok(())
            }
            Ack::Sub(_) => Err(fail("unexpected acknowledgment".to_string())),
        }
    }

    /// Close the connection cleanly. The broker discards the last will.
    ///
    /// # Errors
    ///
    /// `Connection` if the link fails to send DISCONNECT. The session is
    /// closed either way.
    pub async fn disconnect(&self) -> TransportResult<()> {
        let was_connected = self.is_connected();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.state.send_replace(ConnectionState::Closed);

        let result = if was_connected {
            self.link.disconnect().await
        } else {
            Ok(())
        };

        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        self.shared.reset();
        info!(client_id = %self.client_id(), "Session closed");

        result.map_err(|err| TransportError::Connection {
            reason: err.to_string(),
        })
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
    }
}
