//! # Lifecycle Runtime
//!
//! Wires the state machine to the transport: a command task, a return
//! timer per move, a heartbeat task and a connection supervisor that
//! brings the session back after an unexpected drop.

use crate::domain::state::{CommandOutcome, DeviceState};
use crate::error::{LifecycleError, LifecycleResult};
use crate::metrics::LifecycleStats;
use fc_01_correlator::Correlator;
use fc_02_shadow_sync::{ShadowConfig, ShadowSynchronizer};
use parking_lot::Mutex;
use shared_bus::{ConnectionState, MessageSubscription, TransportError, TransportSession};
use shared_types::{now_millis, CommandMessage, LifecycleState, StatusMessage, TopicScheme};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Runtime parameters for one device.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub device_name: String,
    pub topics: TopicScheme,
    /// Default: `robot`.
    pub shadow_name: String,
    /// Default: 10s.
    pub heartbeat_interval: Duration,
    /// Time spent `moving` before returning to `idle`. Default: 5s.
    pub moving_duration: Duration,
    /// Deadline for shadow get/update outcomes. Default: 20s.
    pub shadow_timeout: Duration,
    /// First wait after a dropped connection; doubles per failed attempt.
    /// Default: 1s.
    pub reconnect_delay: Duration,
    /// Default: 30s.
    pub max_reconnect_delay: Duration,
}

impl LifecycleConfig {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            topics: TopicScheme::default(),
            shadow_name: "robot".to_string(),
            heartbeat_interval: Duration::from_secs(10),
            moving_duration: Duration::from_secs(5),
            shadow_timeout: Duration::from_secs(20),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

struct Inner {
    session: Arc<TransportSession>,
    shadow: ShadowSynchronizer,
    config: LifecycleConfig,
    state: AsyncMutex<DeviceState>,
    stats: LifecycleStats,
    status_topic: String,
    command_topic: String,
    return_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the device state and every task that touches it.
pub struct LifecycleMachine {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl LifecycleMachine {
    /// The session must not be connected yet; [`Self::start`] registers
    /// the last will first.
    pub fn new(session: Arc<TransportSession>, config: LifecycleConfig) -> Self {
        let shadow = ShadowSynchronizer::new(
            Arc::new(Correlator::new(Arc::clone(&session))),
            ShadowConfig {
                device_name: config.device_name.clone(),
                shadow_name: config.shadow_name.clone(),
                timeout: config.shadow_timeout,
                topics: config.topics.clone(),
            },
        );
        let status_topic = config.topics.status(&config.device_name);
        let command_topic = config.topics.command(&config.device_name);

        Self {
            inner: Arc::new(Inner {
                session,
                shadow,
                config,
                state: AsyncMutex::new(DeviceState::new(now_millis())),
                stats: LifecycleStats::default(),
                status_topic,
                command_topic,
                return_timer: Mutex::new(None),
            }),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn session(&self) -> &Arc<TransportSession> {
        &self.inner.session
    }

    #[must_use]
    pub fn shadow(&self) -> &ShadowSynchronizer {
        &self.inner.shadow
    }

    #[must_use]
    pub fn stats(&self) -> &LifecycleStats {
        &self.inner.stats
    }

    #[must_use]
    pub fn status_topic(&self) -> &str {
        &self.inner.status_topic
    }

    #[must_use]
    pub fn command_topic(&self) -> &str {
        &self.inner.command_topic
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.state.lock().await.state()
    }

    pub async fn snapshot(&self) -> DeviceState {
        self.inner.state.lock().await.clone()
    }

    /// Bring the device online:
    ///
    /// 1. register the retained `offline` last will
    /// 2. connect, supervised: a dropped connection is reopened with
    ///    backoff and the command subscription and status restored
    /// 3. subscribe to the command topic
    /// 4. read the shadow and seed the report version from it
    /// 5. publish the initial retained status
    /// 6. start the heartbeat
    ///
    /// A failed shadow sync is logged; the device still comes up.
    ///
    /// # Errors
    ///
    /// `Transport` if the last will, connect or command subscription fails.
    pub async fn start(&self) -> LifecycleResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LifecycleError::AlreadyStarted);
        }
        let inner = &self.inner;

        let will = serde_json::to_vec(&StatusMessage::last_will(now_millis()))
            .map_err(|err| TransportError::Encode(err.to_string()))?;
        inner
            .session
            .register_last_will(inner.status_topic.clone(), will)?;

        self.spawn(supervise_connection(
            Arc::clone(inner),
            inner.session.watch_state(),
        ));
        inner.session.connect().await?;

        let commands = inner
            .session
            .subscribe_messages(&[inner.command_topic.as_str()])?;
        inner
            .session
            .subscribe(&[inner.command_topic.as_str()])
            .await?;
        self.spawn(command_loop(Arc::clone(inner), commands));

        match inner.sync_shadow().await {
            Ok(version) => info!(version, "Shadow synchronized"),
            Err(err) => warn!(error = %err, "Initial shadow sync failed"),
        }

        {
            let state = inner.state.lock().await;
            inner.publish_status(&state).await;
        }
        self.spawn(heartbeat_loop(Arc::clone(inner)));

        info!(
            device = %inner.config.device_name,
            command_topic = %inner.command_topic,
            status_topic = %inner.status_topic,
            "Lifecycle runtime started"
        );
        Ok(())
    }

    /// Read the remote shadow (bootstrapping it if missing) and raise the
    /// local version to its `reported.version`. Returns the local version.
    ///
    /// # Errors
    ///
    /// `Shadow` if the read fails.
    pub async fn sync_shadow(&self) -> LifecycleResult<u64> {
        self.inner.sync_shadow().await
    }

    /// Apply one command payload. `None` if the payload did not decode.
    pub async fn handle_command(&self, payload: &[u8]) -> Option<CommandOutcome> {
        self.inner.handle_command(payload).await
    }

    /// Stop every task, announce `offline` (retained) and disconnect
    /// cleanly so the broker discards the last will.
    ///
    /// # Errors
    ///
    /// `Transport` if the disconnect fails. A failed final status is
    /// only logged.
    pub async fn shutdown(&self) -> LifecycleResult<()> {
        self.started.store(true, Ordering::SeqCst);
        self.abort_tasks();

        {
            let mut state = self.inner.state.lock().await;
            let from = state.state();
            if state.go_offline(now_millis()) {
                info!(
                    %from,
                    to = %LifecycleState::Offline,
                    request_id = state.request_id().unwrap_or_default(),
                    "State transition"
                );
                self.inner.stats.record_transition();
                if self.inner.session.is_connected() {
                    self.inner.publish_status(&state).await;
                }
            }
        }

        self.inner.session.disconnect().await?;
        info!(device = %self.inner.config.device_name, "Lifecycle runtime stopped");
        Ok(())
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(task));
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(timer) = self.inner.return_timer.lock().take() {
            timer.abort();
        }
    }
}

impl Drop for LifecycleMachine {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl Inner {
    async fn sync_shadow(&self) -> LifecycleResult<u64> {
        let synced = self.shadow.get_or_bootstrap().await?;
        let remote = synced.document.reported_version().unwrap_or(0);
        Ok(self.shadow.seed_version(remote).await)
    }

    /// Retry [`Self::resume_session`] with doubling delays. `false` once
    /// the session is closed.
    async fn reconnect(&self) -> bool {
        let mut delay = self.config.reconnect_delay.max(Duration::from_millis(1));
        loop {
            tokio::time::sleep(delay).await;
            if self.session.state() == ConnectionState::Closed {
                return false;
            }
            match self.resume_session().await {
                Ok(()) => {
                    self.stats.record_reconnect();
                    info!(device = %self.config.device_name, "Reconnected");
                    return true;
                }
                Err(err) => {
                    self.stats.record_failed_reconnect();
                    delay = (delay * 2)
                        .min(self.config.max_reconnect_delay)
                        .max(Duration::from_millis(1));
                    warn!(error = %err, retry_in = ?delay, "Reconnect failed");
                }
            }
        }
    }

    /// Reopen the session, restore the command subscription, resync the
    /// shadow and replace the broker's `offline` will with the current
    /// status.
    async fn resume_session(&self) -> LifecycleResult<()> {
        self.session.connect().await?;
        self.session.subscribe(&[self.command_topic.as_str()]).await?;

        match self.sync_shadow().await {
            Ok(version) => debug!(version, "Shadow resynchronized"),
            Err(err) => warn!(error = %err, "Shadow resync failed"),
        }

        let state = self.state.lock().await;
        self.publish_status(&state).await;
        Ok(())
    }

    async fn handle_command(self: &Arc<Self>, payload: &[u8]) -> Option<CommandOutcome> {
        let command = match CommandMessage::from_bytes(payload) {
            Ok(command) => command,
            Err(err) => {
                self.stats.record_malformed();
                warn!(error = %err, "Dropping undecodable command");
                return None;
            }
        };
        let request_id = command.request_id_or_new();
        let destination = command.destination();

        let mut state = self.state.lock().await;
        let outcome = state.begin_move(request_id.clone(), destination, now_millis());
        match outcome {
            CommandOutcome::Started { generation } => {
                info!(
                    from = %LifecycleState::Idle,
                    to = %LifecycleState::Moving,
                    request_id = %request_id,
                    dest = destination,
                    "State transition"
                );
                self.stats.record_transition();
                self.arm_return_timer(generation);
                self.publish_transition(&state).await;
            }
            CommandOutcome::Ignored { state: current } => {
                self.stats.record_ignored();
                info!(state = %current, request_id = %request_id, "Command ignored");
            }
        }
        Some(outcome)
    }

    fn arm_return_timer(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        let delay = self.config.moving_duration;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.finish_move(generation).await;
        });
        if let Some(previous) = self.return_timer.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn finish_move(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if !state.finish_move(generation, now_millis()) {
            debug!(generation, "Stale return timer");
            return;
        }
        info!(
            from = %LifecycleState::Moving,
            to = %LifecycleState::Idle,
            request_id = state.request_id().unwrap_or_default(),
            "State transition"
        );
        self.stats.record_transition();
        self.publish_transition(&state).await;
    }

    /// Shadow report, then retained status. Caller holds the state lock.
    async fn publish_transition(&self, state: &DeviceState) {
        match self.shadow.report(&state.reported()).await {
            Ok(report) => debug!(version = report.version, "Shadow reported"),
            Err(err) => {
                self.stats.record_failure();
                warn!(error = %err, "Shadow report failed");
            }
        }
        self.publish_status(state).await;
    }

    /// Caller holds the state lock until the publish is acknowledged, so
    /// an older status never lands after a newer one.
    async fn publish_status(&self, state: &DeviceState) -> bool {
        let status = state.status(now_millis());
        match self
            .session
            .publish_json(&self.status_topic, &status, true)
            .await
        {
            Ok(()) => {
                self.stats.record_status();
                debug!(state = %status.state, "Status published");
                true
            }
            Err(err) => {
                self.stats.record_failure();
                warn!(
                    state = %status.state,
                    error = %err,
                    "Status publish failed, retrying on next heartbeat"
                );
                false
            }
        }
    }
}

async fn command_loop(inner: Arc<Inner>, mut commands: MessageSubscription) {
    while let Some(message) = commands.recv().await {
        inner.handle_command(&message.payload).await;
    }
    debug!("Command stream closed");
}

async fn heartbeat_loop(inner: Arc<Inner>) {
    let period = inner.config.heartbeat_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        // Held across the publish: a beat racing a transition must not
        // retain the pre-transition state.
        let state = inner.state.lock().await;
        if state.state() == LifecycleState::Offline {
            break;
        }
        if inner.publish_status(&state).await {
            debug!(state = %state.state(), "Heartbeat");
        }
    }
}

/// Reconnects after a drop from `Connected`. A refused first connect is
/// left to the caller of [`LifecycleMachine::start`]; `Closed` ends it.
async fn supervise_connection(inner: Arc<Inner>, mut states: watch::Receiver<ConnectionState>) {
    let device = inner.config.device_name.clone();
    let mut was_connected = false;

    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        info!(device = %device, state = ?state, "Connection state changed");
        match state {
            ConnectionState::Connected => was_connected = true,
            ConnectionState::Closed => break,
            ConnectionState::Disconnected if was_connected => loop {
                if !inner.reconnect().await {
                    return;
                }
                // The reconnect's own transitions are already handled; a
                // drop that raced it is not.
                if *states.borrow_and_update() != ConnectionState::Disconnected {
                    break;
                }
            },
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }
    }
    debug!(device = %device, "Connection supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_bus::{ConnectOptions, InMemoryBroker, SessionConfig};
    use tokio::time::timeout;

    const DEVICE: &str = "AMR-001";

    fn session(broker: &InMemoryBroker, client_id: &str) -> Arc<TransportSession> {
        Arc::new(TransportSession::new(
            Arc::new(broker.link()),
            ConnectOptions::new(client_id),
            SessionConfig::default(),
        ))
    }

    /// Answers shadow reads with `reported.version = 7`.
    async fn shadow_backend(broker: &InMemoryBroker) -> Arc<TransportSession> {
        let scheme = TopicScheme::default();
        let get = scheme.shadow_get(DEVICE, "robot");
        let update = scheme.shadow_update(DEVICE, "robot");
        let backend = session(broker, "shadow-backend");
        backend.connect().await.unwrap();
        let requests = [get.request.as_str(), update.request.as_str()];
        let mut inbox = backend.subscribe_messages(&requests).unwrap();
        backend.subscribe(&requests).await.unwrap();

        let responder = Arc::clone(&backend);
        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let (topic, body) = if message.topic == get.request {
                    (&get.outcomes.accepted, json!({"state": {"reported": {"version": 7}}}))
                } else {
                    (&update.outcomes.accepted, json!({}))
                };
                responder.publish_json(topic, &body, false).await.unwrap();
            }
        });
        backend
    }

    async fn observer(broker: &InMemoryBroker) -> (Arc<TransportSession>, MessageSubscription) {
        let topic = TopicScheme::default().status(DEVICE);
        let observer = session(broker, "observer");
        observer.connect().await.unwrap();
        let statuses = observer.subscribe_messages(&[topic.as_str()]).unwrap();
        observer.subscribe(&[topic.as_str()]).await.unwrap();
        (observer, statuses)
    }

    async fn next_status(statuses: &mut MessageSubscription) -> StatusMessage {
        timeout(Duration::from_secs(60), statuses.recv())
            .await
            .expect("status in time")
            .expect("open subscription")
            .decode()
            .expect("status payload")
    }

    async fn started(broker: &InMemoryBroker) -> (LifecycleMachine, Arc<TransportSession>) {
        let backend = shadow_backend(broker).await;
        let machine = LifecycleMachine::new(session(broker, DEVICE), LifecycleConfig::new(DEVICE));
        machine.start().await.unwrap();
        (machine, backend)
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_moves_then_returns_to_idle() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;
        let (observer, mut statuses) = observer(&broker).await;

        // Retained initial status.
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
        assert_eq!(machine.stats().transitions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_while_moving_is_ignored() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;
        let (observer, mut statuses) = observer(&broker).await;
        next_status(&mut statuses).await;

        let topic = machine.command_topic().to_string();
        observer
            .publish_json(&topic, &json!({"requestId": "r1"}), false)
            .await
            .unwrap();
        assert_eq!(next_status(&mut statuses).await.state, LifecycleState::Moving);

        observer
            .publish_json(&topic, &json!({"requestId": "r2"}), false)
            .await
            .unwrap();

        let idle = next_status(&mut statuses).await;
        assert_eq!(idle.state, LifecycleState::Idle);
        assert_eq!(idle.request_id.as_deref(), Some("r1"));
        assert_eq!(machine.stats().ignored_commands(), 1);
        assert_eq!(machine.stats().transitions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shadow_version_continues_from_remote() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;
        assert_eq!(machine.shadow().version().await, 7);

        let outcome = machine.handle_command(b"{}").await;
        assert!(matches!(outcome, Some(CommandOutcome::Started { .. })));
        assert_eq!(machine.shadow().version().await, 8);

        // No requestId in the command: one is synthesized.
        let snapshot = machine.snapshot().await;
        assert_eq!(snapshot.request_id().map(str::len), Some(36));
        assert_eq!(snapshot.destination(), Some("A-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_republishes_current_status() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;
        let (_observer, mut statuses) = observer(&broker).await;
        let initial = next_status(&mut statuses).await;

        let beat = next_status(&mut statuses).await;
        assert_eq!(beat.state, LifecycleState::Idle);
        assert_eq!(beat.updated_at, initial.updated_at);
        assert!(beat.heartbeat_at.is_some());
        assert!(machine.stats().status_published() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_command_is_dropped() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;

        assert!(machine.handle_command(b"not json").await.is_none());
        assert_eq!(machine.state().await, LifecycleState::Idle);
        assert_eq!(machine.stats().malformed_commands(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_announces_offline() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;
        machine.handle_command(br#"{"requestId":"r1"}"#).await;

        machine.shutdown().await.unwrap();
        assert_eq!(machine.state().await, LifecycleState::Offline);
        assert!(!broker.is_connected(DEVICE));

        let retained: StatusMessage = broker
            .retained(machine.status_topic())
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(retained.state, LifecycleState::Offline);
        assert!(retained.heartbeat_at.is_some());

        // Terminal: later commands change nothing.
        assert!(matches!(
            machine.handle_command(b"{}").await,
            Some(CommandOutcome::Ignored {
                state: LifecycleState::Offline
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_severed_connection_publishes_last_will() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;

        assert!(broker.sever(DEVICE));
        let retained: StatusMessage = broker
            .retained(machine.status_topic())
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(retained.state, LifecycleState::Offline);
        assert!(retained.heartbeat_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop_and_restores_status() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;

        assert!(broker.sever(DEVICE));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(broker.is_connected(DEVICE));
        assert!(machine.session().is_connected());
        assert_eq!(machine.stats().reconnects(), 1);
        let retained: StatusMessage = broker
            .retained(machine.status_topic())
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(retained.state, LifecycleState::Idle);

        // Commands reach the device again.
        let (observer, mut statuses) = observer(&broker).await;
        assert_eq!(next_status(&mut statuses).await.state, LifecycleState::Idle);
        observer
            .publish_json(machine.command_topic(), &json!({"requestId": "r1"}), false)
            .await
            .unwrap();
        let moving = next_status(&mut statuses).await;
        assert_eq!(moving.state, LifecycleState::Moving);
        assert_eq!(moving.request_id.as_deref(), Some("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backs_off_while_refused() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;
        broker.require_trusted_credentials(true);
        assert!(broker.sever(DEVICE));

        // Attempts at 1s, 3s and 7s; the next one waits 8s more.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!broker.is_connected(DEVICE));
        assert_eq!(machine.stats().failed_reconnects(), 3);
        assert_eq!(machine.stats().reconnects(), 0);

        broker.require_trusted_credentials(false);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(broker.is_connected(DEVICE));
        assert_eq!(machine.stats().reconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_is_not_reopened() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;

        assert!(broker.sever(DEVICE));
        machine.session().disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(!broker.is_connected(DEVICE));
        assert_eq!(machine.session().state(), ConnectionState::Closed);
        assert_eq!(machine.stats().reconnects(), 0);
        assert_eq!(machine.stats().failed_reconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_racing_command_keeps_newer_status() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;

        // The first beat is due at this instant.
        tokio::time::sleep(machine.config().heartbeat_interval).await;
        machine.handle_command(br#"{"requestId":"r1"}"#).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let retained: StatusMessage = broker
            .retained(machine.status_topic())
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(retained.state, LifecycleState::Moving);
        assert_eq!(retained.request_id.as_deref(), Some("r1"));
        assert!(machine.stats().status_published() >= 2);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let broker = InMemoryBroker::new();
        let (machine, _backend) = started(&broker).await;
        assert_eq!(machine.start().await, Err(LifecycleError::AlreadyStarted));
    }
}
