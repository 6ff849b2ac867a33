//! # Message Subscriptions
//!
//! Local views over the session's inbound fan-out. A subscription sees only
//! messages arriving after it was created; broker-side subscription is a
//! separate step ([`crate::TransportSession::subscribe`]).

use crate::filter::TopicFilter;
use crate::message::InboundMessage;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The session was dropped.
    #[error("Transport session closed")]
    Closed,
}

/// Receives inbound messages matching any of its filters. An empty filter
/// list receives every message, `$` topics included.
pub struct MessageSubscription {
    receiver: broadcast::Receiver<InboundMessage>,
    filters: Vec<TopicFilter>,
}

impl MessageSubscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<InboundMessage>,
        filters: Vec<TopicFilter>,
    ) -> Self {
        Self { receiver, filters }
    }

    fn accepts(&self, message: &InboundMessage) -> bool {
        self.filters.is_empty()
            || self.filters.iter().any(|filter| filter.matches(&message.topic))
    }

    /// Next matching message, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        loop {
            let message = match self.receiver.recv().await {
                Ok(m) => m,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Subscriber lagged, some messages dropped");
                    continue;
                }
            };

            if self.accepts(&message) {
                return Some(message);
            }
        }
    }

    /// Non-blocking variant of [`Self::recv`]. `Ok(None)` when nothing is
    /// queued.
    ///
    /// # Errors
    ///
    /// `SubscriptionError::Closed` once the session is gone.
    pub fn try_recv(&mut self) -> Result<Option<InboundMessage>, SubscriptionError> {
        loop {
            let message = match self.receiver.try_recv() {
                Ok(m) => m,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };

            if self.accepts(&message) {
                return Ok(Some(message));
            }
        }
    }

    #[must_use]
    pub fn filters(&self) -> &[TopicFilter] {
        &self.filters
    }
}
