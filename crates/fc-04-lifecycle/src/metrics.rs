//! Lifecycle counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LifecycleStats {
    transitions: AtomicU64,
    ignored_commands: AtomicU64,
    malformed_commands: AtomicU64,
    status_published: AtomicU64,
    publish_failures: AtomicU64,
    reconnects: AtomicU64,
    failed_reconnects: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl LifecycleStats {
    pub(crate) fn record_transition(&self) {
        bump(&self.transitions);
    }

    pub(crate) fn record_ignored(&self) {
        bump(&self.ignored_commands);
    }

    pub(crate) fn record_malformed(&self) {
        bump(&self.malformed_commands);
    }

    pub(crate) fn record_status(&self) {
        bump(&self.status_published);
    }

    pub(crate) fn record_failure(&self) {
        bump(&self.publish_failures);
    }

    pub(crate) fn record_reconnect(&self) {
        bump(&self.reconnects);
    }

    pub(crate) fn record_failed_reconnect(&self) {
        bump(&self.failed_reconnects);
    }

    /// State changes, including the final `offline`.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Commands dropped because the device was not idle.
    pub fn ignored_commands(&self) -> u64 {
        self.ignored_commands.load(Ordering::Relaxed)
    }

    pub fn malformed_commands(&self) -> u64 {
        self.malformed_commands.load(Ordering::Relaxed)
    }

    /// Status publications acknowledged by the broker.
    pub fn status_published(&self) -> u64 {
        self.status_published.load(Ordering::Relaxed)
    }

    /// Status or shadow publications that failed.
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Sessions restored after an unexpected drop.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn failed_reconnects(&self) -> u64 {
        self.failed_reconnects.load(Ordering::Relaxed)
    }
}
