//! Lifecycle runtime on a freshly provisioned identity.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{next_message, rotation_config, Fleet, SHADOW};
    use fc_03_provisioning::{CredentialStore, InMemoryCredentialStore, RotationWorkflow};
    use fc_04_lifecycle::{LifecycleConfig, LifecycleMachine};
    use serde_json::json;
    use shared_bus::MessageSubscription;
    use shared_types::{ClientCredential, CredentialRef, LifecycleState, StatusMessage, TopicScheme};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Rotate a claim credential and return the device name and its
    /// production credential.
    async fn provisioned(fleet: &Fleet) -> (String, ClientCredential) {
        let store = Arc::new(InMemoryCredentialStore::new());
        let claim_ref = CredentialRef::new("claim.crt", "claim.key");
        let claim = fleet.backend.issue_claim_credential();
        store.insert(claim_ref.clone(), claim.clone());

        let report = RotationWorkflow::new(
            Arc::new(fleet.broker.clone()),
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            claim_ref,
            claim,
            rotation_config(),
        )
        .provision(None)
        .await;
        assert!(report.is_success(), "{:?}", report.error);

        let credential = store.load(&report.credential.unwrap()).await.unwrap();
        (report.device_name.unwrap(), credential)
    }

    async fn running(fleet: &Fleet) -> (String, LifecycleMachine) {
        let (device, credential) = provisioned(fleet).await;
        let machine = LifecycleMachine::new(
            fleet.session(&device, credential),
            LifecycleConfig::new(&device),
        );
        machine.start().await.unwrap();
        (device, machine)
    }

    async fn next_status(inbox: &mut MessageSubscription) -> StatusMessage {
        next_message(inbox).await.decode().expect("status payload")
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_command_round_trip() {
        let fleet = Fleet::start().await;
        let (device, machine) = running(&fleet).await;
        let status_topic = TopicScheme::default().status(&device);
        let (observer, mut statuses) = fleet.observer(&[status_topic.as_str()]).await;

        assert_eq!(next_status(&mut statuses).await.state, LifecycleState::Idle);

        let sent_at = Instant::now();
        observer
            .publish_json(
                machine.command_topic(),
                &json!({"requestId": "r1", "dest": "A-01"}),
                false,
            )
            .await
            .unwrap();

        let moving = next_status(&mut statuses).await;
        assert_eq!(moving.state, LifecycleState::Moving);
        assert_eq!(moving.request_id.as_deref(), Some("r1"));

        let idle = next_status(&mut statuses).await;
        assert_eq!(idle.state, LifecycleState::Idle);
        assert!(sent_at.elapsed() >= Duration::from_secs(5));

        let (reported, _) = fleet.backend.shadow(&device, SHADOW).unwrap();
        assert_eq!(reported["state"], "idle");
        assert_eq!(reported["requestId"], "r1");
        assert_eq!(reported["version"], 2);
        assert_eq!(machine.stats().transitions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_command_while_moving_is_ignored() {
        let fleet = Fleet::start().await;
        let (device, machine) = running(&fleet).await;
        let status_topic = TopicScheme::default().status(&device);
        let (observer, mut statuses) = fleet.observer(&[status_topic.as_str()]).await;
        next_status(&mut statuses).await;

        let sent_at = Instant::now();
        for (request_id, delay) in [("r1", 0), ("r2", 2)] {
            tokio::time::sleep(Duration::from_secs(delay)).await;
            observer
                .publish_json(machine.command_topic(), &json!({"requestId": request_id}), false)
                .await
                .unwrap();
        }

        let moving = next_status(&mut statuses).await;
        assert_eq!(moving.request_id.as_deref(), Some("r1"));
        let idle = next_status(&mut statuses).await;
        assert_eq!(idle.state, LifecycleState::Idle);
        // The timer armed by r1 was not reset by r2.
        assert!(sent_at.elapsed() < Duration::from_secs(6));
        assert_eq!(machine.stats().ignored_commands(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_versions_keep_rising_across_restart() {
        let fleet = Fleet::start().await;
        let (device, credential) = provisioned(&fleet).await;
        let status_topic = TopicScheme::default().status(&device);
        let (observer, mut statuses) = fleet.observer(&[status_topic.as_str()]).await;

        let mut last_version = 0;
        for _ in 0..2 {
            let machine = LifecycleMachine::new(
                fleet.session(&device, credential.clone()),
                LifecycleConfig::new(&device),
            );
            machine.start().await.unwrap();
            observer
                .publish_json(machine.command_topic(), &json!({"dest": "B-02"}), false)
                .await
                .unwrap();
            loop {
                let status = next_status(&mut statuses).await;
                if status.state == LifecycleState::Idle && status.request_id.is_some() {
                    break;
                }
            }

            let (reported, _) = fleet.backend.shadow(&device, SHADOW).unwrap();
            let version = reported["version"].as_u64().unwrap();
            assert_eq!(version, last_version + 2);
            assert_eq!(reported["dest"], "B-02");
            last_version = version;
            machine.shutdown().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_announces_offline_then_recovers() {
        let fleet = Fleet::start().await;
        let (device, _machine) = running(&fleet).await;
        let status_topic = TopicScheme::default().status(&device);
        let (_observer, mut statuses) = fleet.observer(&[status_topic.as_str()]).await;
        next_status(&mut statuses).await;

        assert!(fleet.broker.sever(&device));

        let will = next_status(&mut statuses).await;
        assert_eq!(will.state, LifecycleState::Offline);
        assert!(will.heartbeat_at.is_none());
        let retained = fleet.broker.retained(&status_topic).unwrap();
        assert_eq!(retained.json().unwrap()["state"], "offline");

        // The supervisor reconnects with the production credential and
        // overwrites the will.
        let recovered = next_status(&mut statuses).await;
        assert_eq!(recovered.state, LifecycleState::Idle);
        assert!(fleet.broker.is_connected(&device));
        let retained = fleet.broker.retained(&status_topic).unwrap();
        assert_eq!(retained.json().unwrap()["state"], "idle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_observed_every_interval() {
        let fleet = Fleet::start().await;
        let (device, _machine) = running(&fleet).await;
        let status_topic = TopicScheme::default().status(&device);
        let (_observer, mut statuses) = fleet.observer(&[status_topic.as_str()]).await;
        let initial = next_status(&mut statuses).await;

        let before = Instant::now();
        let beat = next_status(&mut statuses).await;
        assert_eq!(beat.state, LifecycleState::Idle);
        assert_eq!(beat.updated_at, initial.updated_at);
        assert!(beat.heartbeat_at.is_some());
        assert!(before.elapsed() <= Duration::from_secs(10));
    }
}
