//! # Messages
//!
//! What travels over a [`crate::BrokerLink`] in each direction.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

/// Delivery guarantee of a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum QoS {
    /// Fire and forget. No PubAck.
    AtMostOnce,
    /// Acknowledged delivery. The default for everything the runtime sends.
    #[default]
    AtLeastOnce,
}

impl QoS {
    #[must_use]
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }
}

/// A message delivered by the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// True when replayed from the broker's retained store.
    pub retained: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }

    /// Decode the payload as JSON. An empty payload decodes as `{}`.
    ///
    /// # Errors
    ///
    /// Returns the decoder error for malformed JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        if self.payload.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_slice(&self.payload)
    }

    /// Decode the payload into a typed value.
    ///
    /// # Errors
    ///
    /// Returns the decoder error for malformed JSON or a shape mismatch.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.json()?)
    }

    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("topic", &self.topic)
            .field("bytes", &self.payload.len())
            .field("retained", &self.retained)
            .finish()
    }
}

/// A message handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        }
    }

    #[must_use]
    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// How the message is seen by a subscriber on live delivery.
    pub fn to_inbound(&self) -> InboundMessage {
        InboundMessage::new(self.topic.clone(), self.payload.clone())
    }
}

/// Message the broker publishes on the session's behalf when the
/// connection drops without a clean disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl LastWill {
    /// Retained, at-least-once will.
    pub fn retained(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }

    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage::new(self.topic.clone(), self.payload.clone())
            .with_qos(self.qos)
            .retained(self.retain)
    }
}
