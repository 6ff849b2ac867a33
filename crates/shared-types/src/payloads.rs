//! # Wire Payloads
//!
//! JSON payloads exchanged with the fleet backend and with operators:
//! commands in, status out, shadow documents and backend rejections.

use crate::errors::PayloadError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// LIFECYCLE STATUS
// =============================================================================

/// Operational state announced on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Moving,
    /// Terminal. Announced by graceful shutdown or by the last will.
    Offline,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Moving => "moving",
            LifecycleState::Offline => "offline",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status publication. Always published retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub state: LifecycleState,
    /// Time of the last state change (ms).
    pub updated_at: u64,
    /// Time of this publication (ms). Absent in the last-will payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<u64>,
    /// Last handled command, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl StatusMessage {
    /// Last-will payload: `{state: "offline", updatedAt}`.
    pub fn last_will(now_ms: u64) -> Self {
        Self {
            state: LifecycleState::Offline,
            updated_at: now_ms,
            heartbeat_at: None,
            request_id: None,
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Destination used when a command does not name one.
pub const DEFAULT_DESTINATION: &str = "A-01";

/// Inbound command on `<app>/<device>/cmd/call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub dest: Option<String>,
    /// Everything else the sender included.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandMessage {
    /// Decode a command. An empty payload is an empty command.
    ///
    /// # Errors
    ///
    /// `PayloadError::Invalid` for malformed JSON.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(payload)?)
    }

    /// The sender's request id, or a freshly synthesized one.
    pub fn request_id_or_new(&self) -> String {
        self.request_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    pub fn destination(&self) -> &str {
        self.dest.as_deref().unwrap_or(DEFAULT_DESTINATION)
    }
}

// =============================================================================
// SHADOW DOCUMENTS
// =============================================================================

/// Shadow update request: `{state: {reported: {...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowUpdate {
    pub state: ReportedSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportedSection {
    pub reported: Map<String, Value>,
}

impl ShadowUpdate {
    pub fn reported(reported: Map<String, Value>) -> Self {
        Self {
            state: ReportedSection { reported },
        }
    }
}

/// Shadow document as returned by an accepted shadow read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowDocument {
    #[serde(default)]
    pub state: ShadowStateSections,
    /// Backend document version (distinct from the device's reported version).
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowStateSections {
    #[serde(default)]
    pub reported: Option<Map<String, Value>>,
    #[serde(default)]
    pub desired: Option<Map<String, Value>>,
}

impl ShadowDocument {
    /// # Errors
    ///
    /// `PayloadError::Invalid` when the payload does not decode.
    pub fn from_response(payload: &Value) -> Result<Self, PayloadError> {
        Ok(serde_json::from_value(payload.clone())?)
    }

    /// The device-maintained `reported.version`, if present.
    pub fn reported_version(&self) -> Option<u64> {
        self.state
            .reported
            .as_ref()
            .and_then(|reported| reported.get("version"))
            .and_then(Value::as_u64)
    }
}

// =============================================================================
// REJECTIONS
// =============================================================================

/// Code the backend uses for "resource does not exist".
pub const NOT_FOUND_CODE: u16 = 404;

/// Body of a `.../rejected` outcome.
///
/// Shadow services answer `{code, message}`; provisioning services answer
/// `{statusCode, errorCode, errorMessage}`. Both decode here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: u16,
    pub message: String,
}

impl Rejection {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Lenient decode; unknown shapes become code 0 with the raw body.
    pub fn from_payload(payload: &Value) -> Self {
        let code = ["code", "statusCode"]
            .iter()
            .filter_map(|key| payload.get(*key))
            .find_map(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or(0);

        let message = ["message", "errorMessage", "errorCode"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .map(str::to_owned)
            .unwrap_or_else(|| payload.to_string());

        Self { code, message }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == NOT_FOUND_CODE
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}
