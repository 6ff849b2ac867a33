//! # Broker Link Port
//!
//! The seam between [`crate::TransportSession`] and a concrete broker
//! connection. A link only moves packets; acknowledgment matching,
//! timeouts and fan-out live in the session.

use crate::message::{InboundMessage, LastWill, OutboundMessage, QoS};
use async_trait::async_trait;
use shared_types::ClientCredential;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Packet identifier used to match SubAck/PubAck to their request.
pub type PacketId = u16;

/// Broker answer to a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    BadCredentials,
    NotAuthorized,
    ServerUnavailable,
    Refused(u8),
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectReturnCode::Accepted => f.write_str("accepted"),
            ConnectReturnCode::BadCredentials => f.write_str("bad credentials"),
            ConnectReturnCode::NotAuthorized => f.write_str("not authorized"),
            ConnectReturnCode::ServerUnavailable => f.write_str("server unavailable"),
            ConnectReturnCode::Refused(code) => write!(f, "refused ({code})"),
        }
    }
}

/// Everything a link reports back to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnAck {
        code: ConnectReturnCode,
    },
    /// One entry per requested filter; `None` is a refused filter.
    SubAck {
        packet_id: PacketId,
        granted: Vec<Option<QoS>>,
    },
    PubAck {
        packet_id: PacketId,
    },
    Publish(InboundMessage),
    /// The connection is gone. No further events follow.
    Disconnected {
        reason: String,
    },
}

/// Errors raised by a link when handing a packet to the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Link is not connected")]
    NotConnected,

    #[error("Link I/O failure: {0}")]
    Io(String),
}

/// Parameters of one connection.
#[derive(Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    /// Mutual-TLS credential presented to the broker.
    pub credential: Option<ClientCredential>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub last_will: Option<LastWill>,
}

impl ConnectOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            credential: None,
            keep_alive: Duration::from_secs(crate::DEFAULT_KEEP_ALIVE_SECS),
            clean_session: true,
            last_will: None,
        }
    }

    #[must_use]
    pub fn with_credential(mut self, credential: ClientCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("client_id", &self.client_id)
            .field(
                "credential",
                &self.credential.as_ref().map(ClientCredential::fingerprint),
            )
            .field("keep_alive", &self.keep_alive)
            .field("clean_session", &self.clean_session)
            .field("last_will", &self.last_will.as_ref().map(|w| &w.topic))
            .finish()
    }
}

/// Packet-level connection to a broker.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Open the connection and send CONNECT. The first event on the
    /// returned channel is the broker's ConnAck.
    async fn open(
        &self,
        options: &ConnectOptions,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, LinkError>;

    /// Send SUBSCRIBE. The answer arrives as [`LinkEvent::SubAck`].
    async fn subscribe(
        &self,
        packet_id: PacketId,
        filters: &[(String, QoS)],
    ) -> Result<(), LinkError>;

    /// Send PUBLISH. At-least-once messages are answered by
    /// [`LinkEvent::PubAck`].
    async fn publish(&self, packet_id: PacketId, message: OutboundMessage)
        -> Result<(), LinkError>;

    /// Send DISCONNECT. The broker discards the last will.
    async fn disconnect(&self) -> Result<(), LinkError>;
}

/// Creates one link per session.
pub trait LinkFactory: Send + Sync {
    fn create_link(&self) -> Arc<dyn BrokerLink>;
}
