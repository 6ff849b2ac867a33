//! Owned lifecycle state and its transition rules.

use serde_json::{Map, Value};
use shared_types::{LifecycleState, StatusMessage};

/// Result of delivering a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// `idle → moving`. The return timer must be armed with `generation`.
    Started { generation: u64 },
    /// Command dropped; nothing changed.
    Ignored { state: LifecycleState },
}

/// Everything the status and shadow payloads are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    state: LifecycleState,
    updated_at: u64,
    request_id: Option<String>,
    destination: Option<String>,
    /// Bumped by every transition out of `idle`; a return timer only
    /// fires for the generation it was armed with.
    generation: u64,
}

impl DeviceState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            state: LifecycleState::Idle,
            updated_at: now_ms,
            request_id: None,
            destination: None,
            generation: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[must_use]
    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply a command. Only `idle` reacts; `moving` keeps its timer and
    /// request id, `offline` is terminal.
    pub fn begin_move(&mut self, request_id: String, destination: &str, now_ms: u64) -> CommandOutcome {
        if self.state != LifecycleState::Idle {
            return CommandOutcome::Ignored { state: self.state };
        }
        self.generation += 1;
        self.state = LifecycleState::Moving;
        self.updated_at = now_ms;
        self.request_id = Some(request_id);
        self.destination = Some(destination.to_string());
        CommandOutcome::Started {
            generation: self.generation,
        }
    }

    /// Return timer elapsed. Returns `false` for a stale timer.
    pub fn finish_move(&mut self, generation: u64, now_ms: u64) -> bool {
        if self.state != LifecycleState::Moving || self.generation != generation {
            return false;
        }
        self.state = LifecycleState::Idle;
        self.updated_at = now_ms;
        true
    }

    /// Enter the terminal state. Returns `false` if already offline.
    pub fn go_offline(&mut self, now_ms: u64) -> bool {
        if self.state == LifecycleState::Offline {
            return false;
        }
        self.generation += 1;
        self.state = LifecycleState::Offline;
        self.updated_at = now_ms;
        true
    }

    /// Status payload for a publication at `heartbeat_at`.
    #[must_use]
    pub fn status(&self, heartbeat_at: u64) -> StatusMessage {
        StatusMessage {
            state: self.state,
            updated_at: self.updated_at,
            heartbeat_at: Some(heartbeat_at),
            request_id: self.request_id.clone(),
        }
    }

    /// Local fields mirrored into `state.reported`.
    #[must_use]
    pub fn reported(&self) -> Map<String, Value> {
        let mut reported = Map::new();
        reported.insert("state".into(), Value::from(self.state.as_str()));
        if let Some(request_id) = &self.request_id {
            reported.insert("requestId".into(), Value::from(request_id.as_str()));
        }
        if let Some(destination) = &self.destination {
            reported.insert("dest".into(), Value::from(destination.as_str()));
        }
        reported
    }
}
