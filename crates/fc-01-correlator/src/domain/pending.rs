//! Pending outcome table.
//!
//! Maps each claimed outcome pair to the one call waiting on it. The router
//! task resolves entries from inbound messages; the caller's
//! [`PendingGuard`] removes the entry on every exit path (answer, timeout,
//! transport failure, or the call future being dropped).

use crate::domain::outcome::{Outcome, OutcomeKind};
use crate::error::{CorrelatorError, CorrelatorResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_bus::InboundMessage;
use shared_types::OutcomePair;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// A call waiting on one outcome pair
struct PendingCall {
    /// Taken by the first delivery; later deliveries are ignored.
    sender: Option<oneshot::Sender<Outcome>>,
    /// When the pair was claimed
    created_at: Instant,
    /// Request topic (for logging)
    request: String,
}

/// Statistics for the correlator
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    /// Calls that claimed an outcome pair
    pub total_calls: AtomicU64,
    /// Calls answered on the accepted topic
    pub total_accepted: AtomicU64,
    /// Calls answered on the rejected topic
    pub total_rejected: AtomicU64,
    /// Calls that hit their deadline
    pub total_timeouts: AtomicU64,
    /// Calls refused because the pair was already claimed
    pub total_busy: AtomicU64,
}

impl CorrelatorStats {
    pub(crate) fn record_timeout(&self) {
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome pairs currently claimed by a call.
#[derive(Default)]
pub struct PendingOutcomes {
    pending: DashMap<OutcomePair, PendingCall>,
    /// Outcome topic to the pair (and side) it belongs to.
    topics: DashMap<String, (OutcomePair, OutcomeKind)>,
    stats: CorrelatorStats,
}

impl PendingOutcomes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `pair` for one call.
    ///
    /// # Errors
    ///
    /// `CorrelatorError::Busy` if another call holds the pair.
    pub fn claim(
        self: &Arc<Self>,
        pair: &OutcomePair,
        request: &str,
    ) -> CorrelatorResult<(PendingGuard, oneshot::Receiver<Outcome>)> {
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(pair.clone()) {
            Entry::Occupied(existing) => {
                self.stats.total_busy.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request = request,
                    in_flight = %existing.get().request,
                    "Outcome pair already has a call in flight"
                );
                return Err(CorrelatorError::Busy {
                    accepted: pair.accepted.clone(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    sender: Some(tx),
                    created_at: Instant::now(),
                    request: request.to_string(),
                });
            }
        }

        self.topics
            .insert(pair.accepted.clone(), (pair.clone(), OutcomeKind::Accepted));
        self.topics
            .insert(pair.rejected.clone(), (pair.clone(), OutcomeKind::Rejected));
        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
        debug!(request = request, "Claimed outcome pair");

        Ok((
            PendingGuard {
                table: Arc::clone(self),
                pair: pair.clone(),
            },
            rx,
        ))
    }

    /// Hand `message` to the call waiting on its topic.
    ///
    /// Returns true if a waiting call took it.
    pub fn resolve(&self, message: &InboundMessage) -> bool {
        let Some((pair, kind)) = self
            .topics
            .get(&message.topic)
            .map(|route| route.value().clone())
        else {
            return false;
        };

        let Some(mut call) = self.pending.get_mut(&pair) else {
            return false;
        };
        let Some(sender) = call.sender.take() else {
            trace!(topic = %message.topic, "Duplicate outcome ignored");
            return false;
        };

        let outcome = Outcome::from_message(kind, message, call.created_at.elapsed());
        let counter = match kind {
            OutcomeKind::Accepted => &self.stats.total_accepted,
            OutcomeKind::Rejected => &self.stats.total_rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(
            request = %call.request,
            outcome = %kind,
            latency_ms = outcome.latency.as_millis(),
            "Outcome received"
        );

        sender.send(outcome).is_ok()
    }

    fn release(&self, pair: &OutcomePair) {
        if self.pending.remove(pair).is_some() {
            for topic in pair.topics() {
                self.topics.remove(topic);
            }
            trace!(accepted = %pair.accepted, "Released outcome pair");
        }
    }

    /// Number of calls currently waiting.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pending(&self, pair: &OutcomePair) -> bool {
        self.pending.contains_key(pair)
    }

    #[must_use]
    pub fn stats(&self) -> &CorrelatorStats {
        &self.stats
    }
}

/// Holds an outcome pair for one call. Dropping it frees the pair.
pub struct PendingGuard {
    table: Arc<PendingOutcomes>,
    pair: OutcomePair,
}

impl PendingGuard {
    #[must_use]
    pub fn pair(&self) -> &OutcomePair {
        &self.pair
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.release(&self.pair);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> OutcomePair {
        OutcomePair::for_request("$aws/certificates/create/json")
    }

    #[tokio::test]
    async fn test_claim_and_resolve() {
        let table = Arc::new(PendingOutcomes::new());
        let (_guard, rx) = table.claim(&pair(), "create").unwrap();

        let message = InboundMessage::new(pair().accepted, br#"{"ok":true}"#.to_vec());
        assert!(table.resolve(&message));

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Accepted);
        assert_eq!(table.stats().total_accepted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_second_claim_is_busy() {
        let table = Arc::new(PendingOutcomes::new());
        let _first = table.claim(&pair(), "create").unwrap();
        let second = table.claim(&pair(), "create");
        assert!(matches!(second, Err(CorrelatorError::Busy { .. })));
        assert_eq!(table.stats().total_busy.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_guard_drop_releases() {
        let table = Arc::new(PendingOutcomes::new());
        {
            let _claim = table.claim(&pair(), "create").unwrap();
            assert!(table.is_pending(&pair()));
        }
        assert_eq!(table.in_flight(), 0);
        assert!(table.claim(&pair(), "create").is_ok());
    }

    #[test]
    fn test_only_first_delivery_counts() {
        let table = Arc::new(PendingOutcomes::new());
        let (_guard, _rx) = table.claim(&pair(), "create").unwrap();

        assert!(table.resolve(&InboundMessage::new(pair().rejected, b"{}".to_vec())));
        assert!(!table.resolve(&InboundMessage::new(pair().accepted, b"{}".to_vec())));
        assert_eq!(table.stats().total_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(table.stats().total_accepted.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_unrelated_topic_ignored() {
        let table = Arc::new(PendingOutcomes::new());
        let (_guard, _rx) = table.claim(&pair(), "create").unwrap();
        assert!(!table.resolve(&InboundMessage::new("amr/d/status", b"{}".to_vec())));
    }
}
