//! # Correlator Service
//!
//! Binds a [`PendingOutcomes`] table to a [`TransportSession`].

use crate::domain::outcome::Outcome;
use crate::domain::pending::{CorrelatorStats, PendingOutcomes};
use crate::error::{CorrelatorError, CorrelatorResult};
use parking_lot::Mutex;
use serde::Serialize;
use shared_bus::{MessageSubscription, TransportSession};
use shared_types::{OutcomePair, RequestTopics};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Request/response calls over one transport session.
pub struct Correlator {
    session: Arc<TransportSession>,
    pending: Arc<PendingOutcomes>,
    router: Mutex<Option<JoinHandle<()>>>,
}

async fn route(pending: Arc<PendingOutcomes>, mut messages: MessageSubscription) {
    while let Some(message) = messages.recv().await {
        pending.resolve(&message);
    }
    debug!("Correlator router stopped");
}

impl Correlator {
    pub fn new(session: Arc<TransportSession>) -> Self {
        Self {
            session,
            pending: Arc::new(PendingOutcomes::new()),
            router: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    #[must_use]
    pub fn stats(&self) -> &CorrelatorStats {
        self.pending.stats()
    }

    /// Number of calls currently waiting for an outcome.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.in_flight()
    }

    /// Start the router if it is not running. The inbound subscription is
    /// taken synchronously, so anything published afterwards is seen.
    fn ensure_router(&self) {
        let mut router = self.router.lock();
        if router.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let messages = self.session.messages();
        *router = Some(tokio::spawn(route(Arc::clone(&self.pending), messages)));
    }

    /// Subscribe to several outcome pairs ahead of the calls that use them.
    /// Topics already subscribed on this connection are skipped.
    ///
    /// # Errors
    ///
    /// `Transport` naming the first topic that could not be subscribed.
    pub async fn prepare(&self, pairs: &[&OutcomePair]) -> CorrelatorResult<()> {
        self.ensure_router();
        for pair in pairs {
            self.session.ensure_subscribed(&pair.topics()).await?;
        }
        info!(pairs = pairs.len(), "Outcome topics subscribed");
        Ok(())
    }

    /// Publish `payload` as JSON to `topics.request` and wait for either
    /// outcome.
    ///
    /// # Errors
    ///
    /// `Encode` if `payload` does not serialize, otherwise as [`Self::call_raw`].
    pub async fn call<T: Serialize + ?Sized>(
        &self,
        topics: &RequestTopics,
        payload: &T,
        limit: Duration,
    ) -> CorrelatorResult<Outcome> {
        let body =
            serde_json::to_vec(payload).map_err(|err| CorrelatorError::Encode(err.to_string()))?;
        self.call_raw(&topics.request, body, &topics.outcomes, limit)
            .await
    }

    /// Claim `outcomes`, subscribe to both sides, publish, and wait.
    ///
    /// # Errors
    ///
    /// - `Busy` if another call is waiting on `outcomes`
    /// - `Transport` if subscribing or publishing fails
    /// - `Timeout` if neither outcome arrives within `limit`
    pub async fn call_raw(
        &self,
        request: &str,
        payload: Vec<u8>,
        outcomes: &OutcomePair,
        limit: Duration,
    ) -> CorrelatorResult<Outcome> {
        let (_guard, answer) = self.pending.claim(outcomes, request)?;
        self.ensure_router();

        self.session.ensure_subscribed(&outcomes.topics()).await?;
        self.session.publish(request, payload, false).await?;
        debug!(request, timeout_ms = limit.as_millis(), "Request published");

        match timeout(limit, answer).await {
            Ok(Ok(outcome)) => Ok(outcome),
            // The router only drops a sender when the session is gone.
            Ok(Err(_)) => Err(CorrelatorError::Transport(
                shared_bus::TransportError::NotConnected,
            )),
            Err(_) => {
                self.pending.stats().record_timeout();
                warn!(request, timeout_ms = limit.as_millis(), "No outcome before deadline");
                Err(CorrelatorError::Timeout {
                    request: request.to_string(),
                    timeout: limit,
                })
            }
        }
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        if let Some(handle) = self.router.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::OutcomeKind;
    use serde_json::json;
    use shared_bus::{ConnectOptions, InMemoryBroker, SessionConfig};
    use std::sync::atomic::Ordering;

    const REQUEST: &str = "$aws/certificates/create/json";

    async fn connected(broker: &InMemoryBroker, client_id: &str) -> Arc<TransportSession> {
        let session = Arc::new(TransportSession::new(
            Arc::new(broker.link()),
            ConnectOptions::new(client_id),
            SessionConfig::default(),
        ));
        session.connect().await.unwrap();
        session
    }

    /// Answers every request on `REQUEST` with `reply` on the given side.
    async fn responder(broker: &InMemoryBroker, kind: OutcomeKind, reply: serde_json::Value) {
        let backend = connected(broker, "backend").await;
        backend.subscribe(&[REQUEST]).await.unwrap();
        let mut requests = backend.subscribe_messages(&[REQUEST]).unwrap();
        let topics = RequestTopics::new(REQUEST);
        tokio::spawn(async move {
            while requests.recv().await.is_some() {
                let topic = match kind {
                    OutcomeKind::Accepted => &topics.outcomes.accepted,
                    OutcomeKind::Rejected => &topics.outcomes.rejected,
                };
                backend.publish_json(topic, &reply, false).await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn test_round_trip_accepted() {
        let broker = InMemoryBroker::new();
        responder(&broker, OutcomeKind::Accepted, json!({"certificate": "C"})).await;
        let correlator = Correlator::new(connected(&broker, "device").await);

        let outcome = correlator
            .call(&RequestTopics::new(REQUEST), &json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Accepted);
        assert_eq!(outcome.payload["certificate"], "C");
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_rejected() {
        let broker = InMemoryBroker::new();
        responder(&broker, OutcomeKind::Rejected, json!({"code": 409})).await;
        let correlator = Correlator::new(connected(&broker, "device").await);

        let outcome = correlator
            .call(&RequestTopics::new(REQUEST), &json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome.rejection().map(|r| r.code), Some(409));
        assert_eq!(correlator.stats().total_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_pair() {
        let broker = InMemoryBroker::new();
        let correlator = Correlator::new(connected(&broker, "device").await);
        let topics = RequestTopics::new(REQUEST);

        let err = correlator
            .call(&topics, &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(correlator.in_flight(), 0);

        // The pair is reusable after a timeout.
        let err = correlator
            .call(&topics, &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(correlator.stats().total_timeouts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_call_is_busy() {
        let broker = InMemoryBroker::new();
        let correlator = Arc::new(Correlator::new(connected(&broker, "device").await));
        let topics = RequestTopics::new(REQUEST);

        let first = {
            let correlator = Arc::clone(&correlator);
            let topics = topics.clone();
            tokio::spawn(async move {
                correlator
                    .call(&topics, &json!({}), Duration::from_secs(20))
                    .await
            })
        };
        while correlator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let second = correlator
            .call(&topics, &json!({}), Duration::from_secs(20))
            .await;
        assert!(matches!(second, Err(CorrelatorError::Busy { .. })));

        // The first call still owns its wait.
        assert_eq!(correlator.in_flight(), 1);
        assert!(first.await.unwrap().unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_pair() {
        let broker = InMemoryBroker::new();
        let correlator = Correlator::new(connected(&broker, "device").await);
        let topics = RequestTopics::new(REQUEST);

        let payload = json!({});
        let call = correlator.call(&topics, &payload, Duration::from_secs(20));
        let cancelled = timeout(Duration::from_millis(20), call).await;
        assert!(cancelled.is_err());
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_prepare_subscribes_once() {
        let broker = InMemoryBroker::new();
        let session = connected(&broker, "device").await;
        let correlator = Correlator::new(Arc::clone(&session));
        let pair = OutcomePair::for_request(REQUEST);

        correlator.prepare(&[&pair]).await.unwrap();
        correlator.prepare(&[&pair]).await.unwrap();
        assert!(session.is_subscribed(&pair.accepted));
        assert!(session.is_subscribed(&pair.rejected));
    }
}
