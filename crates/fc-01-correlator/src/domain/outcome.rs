//! Outcome of one correlated call.

use serde_json::Value;
use shared_bus::InboundMessage;
use shared_types::Rejection;
use std::fmt;
use std::time::Duration;

/// Which outcome topic answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Accepted,
    Rejected,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Accepted => f.write_str("accepted"),
            OutcomeKind::Rejected => f.write_str("rejected"),
        }
    }
}

/// The payload that arrived on one side of an outcome pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub kind: OutcomeKind,
    /// Topic the answer arrived on.
    pub topic: String,
    /// Decoded JSON body. A body that is not JSON is kept as a string.
    pub payload: Value,
    /// Time from claiming the pair to the answer.
    pub latency: Duration,
}

impl Outcome {
    pub(crate) fn from_message(kind: OutcomeKind, message: &InboundMessage, latency: Duration) -> Self {
        let payload = message
            .json()
            .unwrap_or_else(|_| Value::String(message.payload_str()));
        Self {
            kind,
            topic: message.topic.clone(),
            payload,
            latency,
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.kind == OutcomeKind::Accepted
    }

    /// The backend's reason, when this outcome is a rejection.
    #[must_use]
    pub fn rejection(&self) -> Option<Rejection> {
        match self.kind {
            OutcomeKind::Rejected => Some(Rejection::from_payload(&self.payload)),
            OutcomeKind::Accepted => None,
        }
    }

    /// Accepted payload, or the parsed rejection.
    ///
    /// # Errors
    ///
    /// The [`Rejection`] when this outcome arrived on the rejected topic.
    pub fn into_accepted(self) -> Result<Value, Rejection> {
        match self.kind {
            OutcomeKind::Accepted => Ok(self.payload),
            OutcomeKind::Rejected => Err(Rejection::from_payload(&self.payload)),
        }
    }
}
