//! Request/response correlation against the loopback backend.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{Fleet, SHADOW};
    use fc_01_correlator::{Correlator, CorrelatorError, OutcomeKind};
    use fc_02_shadow_sync::{ShadowConfig, ShadowSynchronizer};
    use serde_json::json;
    use shared_types::{RequestTopics, TopicScheme};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    async fn correlator(fleet: &Fleet) -> Arc<Correlator> {
        let session = fleet.session("AMR-001", fleet.backend.issue_claim_credential());
        session.connect().await.unwrap();
        Arc::new(Correlator::new(session))
    }

    #[tokio::test]
    async fn test_accepted_rejected_and_timeout() {
        let fleet = Fleet::start().await;
        let correlator = correlator(&fleet).await;
        let topics = TopicScheme::default();
        let limit = Duration::from_secs(1);

        let missing = correlator
            .call(&topics.shadow_get("AMR-001", SHADOW), &json!({}), limit)
            .await
            .unwrap();
        assert_eq!(missing.kind, OutcomeKind::Rejected);
        assert!(missing.rejection().unwrap().is_not_found());

        let written = correlator
            .call(
                &topics.shadow_update("AMR-001", SHADOW),
                &json!({"state": {"reported": {"state": "idle"}}}),
                limit,
            )
            .await
            .unwrap();
        assert_eq!(written.kind, OutcomeKind::Accepted);
        assert_eq!(written.payload["version"], 1);

        // Nobody serves this request.
        let unanswered = RequestTopics::new("amr/AMR-001/diagnostics");
        let err = correlator
            .call(&unanswered, &json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_call_is_busy() {
        let fleet = Fleet::start().await;
        let correlator = correlator(&fleet).await;
        let unanswered = RequestTopics::new("amr/AMR-001/diagnostics");

        let first = {
            let correlator = Arc::clone(&correlator);
            let topics = unanswered.clone();
            tokio::spawn(async move {
                correlator
                    .call(&topics, &json!({}), Duration::from_secs(2))
                    .await
            })
        };
        while correlator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let second = correlator
            .call(&unanswered, &json!({}), Duration::from_secs(2))
            .await;
        assert!(matches!(second, Err(CorrelatorError::Busy { .. })));

        // The refused call leaves the first one waiting.
        assert_eq!(correlator.in_flight(), 1);
        assert!(first.await.unwrap().unwrap_err().is_timeout());
        assert_eq!(correlator.stats().total_busy.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_shadow_bootstrap_runs_once() {
        let fleet = Fleet::start().await;
        let shadow = ShadowSynchronizer::new(correlator(&fleet).await, ShadowConfig::new("AMR-001"));

        let first = shadow.get_or_bootstrap().await.unwrap();
        assert!(first.bootstrapped);
        assert_eq!(first.document.version, Some(1));

        let second = shadow.get_or_bootstrap().await.unwrap();
        assert!(!second.bootstrapped);
        assert_eq!(fleet.backend.shadow("AMR-001", SHADOW).unwrap().1, 1);
    }
}
