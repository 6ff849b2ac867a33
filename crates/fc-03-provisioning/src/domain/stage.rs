//! Rotation stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of one workflow run.
///
/// Success stages are strictly ordered; `Failed` is terminal and reachable
/// from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStage {
    Start,
    BootstrapConnected,
    CredentialIssued,
    Registered,
    Verified,
    Failed,
}

impl RotationStage {
    /// The stage that follows a successful step, if any.
    #[must_use]
    pub fn next(&self) -> Option<RotationStage> {
        match self {
            RotationStage::Start => Some(RotationStage::BootstrapConnected),
            RotationStage::BootstrapConnected => Some(RotationStage::CredentialIssued),
            RotationStage::CredentialIssued => Some(RotationStage::Registered),
            RotationStage::Registered => Some(RotationStage::Verified),
            RotationStage::Verified | RotationStage::Failed => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RotationStage::Verified | RotationStage::Failed)
    }
}

impl fmt::Display for RotationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationStage::Start => "Start",
            RotationStage::BootstrapConnected => "BootstrapConnected",
            RotationStage::CredentialIssued => "CredentialIssued",
            RotationStage::Registered => "Registered",
            RotationStage::Verified => "Verified",
            RotationStage::Failed => "Failed",
        };
        f.write_str(name)
    }
}
