//! Reported-document construction.

use serde_json::{Map, Value};
use shared_types::ShadowUpdate;

/// One published report.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowReport {
    pub version: u64,
    /// Milliseconds since the epoch.
    pub updated_at: u64,
    pub document: ShadowUpdate,
}

/// `{state: {reported: {...local, version, updatedAt}}}`. The counter and
/// timestamp always win over same-named keys in `local`.
#[must_use]
pub fn build_report(local: &Map<String, Value>, version: u64, updated_at: u64) -> ShadowUpdate {
    let mut reported = local.clone();
    reported.insert("version".to_string(), Value::from(version));
    reported.insert("updatedAt".to_string(), Value::from(updated_at));
    ShadowUpdate::reported(reported)
}

/// Minimal document written to create a missing shadow.
#[must_use]
pub fn bootstrap_marker(now_secs: u64) -> ShadowUpdate {
    let mut reported = Map::new();
    reported.insert("_init".to_string(), Value::Bool(true));
    reported.insert("ts".to_string(), Value::from(now_secs));
    ShadowUpdate::reported(reported)
}
