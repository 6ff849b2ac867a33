//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Identity**: `Identity`, `IdentityStage`, `CredentialRef`
//! - **Credentials**: `ClientCredential`, `IssuedCredential`
//! - **Registration**: `RegistrationRequest`, `RegistrationAccepted`

use crate::errors::PayloadError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// =============================================================================
// CLUSTER A: IDENTITY
// =============================================================================

/// Lifecycle stage of a device identity.
///
/// ```text
/// [Bootstrap] ──issue──→ [Candidate] ──verify──→ [Active]
///                            │
///                            └──abort──→ [Failed]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStage {
    /// Shared provisioning (claim) credential.
    Bootstrap,
    /// Freshly issued credential, not yet verified.
    Candidate,
    /// Verified production credential.
    Active,
    /// Candidate whose rotation was aborted.
    Failed,
}

impl fmt::Display for IdentityStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentityStage::Bootstrap => "bootstrap",
            IdentityStage::Candidate => "candidate",
            IdentityStage::Active => "active",
            IdentityStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Location of a persisted certificate/private-key pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialRef {
    /// PEM certificate path.
    pub certificate_path: PathBuf,
    /// PEM private key path (owner-only permissions).
    pub private_key_path: PathBuf,
}

impl CredentialRef {
    pub fn new(certificate_path: impl Into<PathBuf>, private_key_path: impl Into<PathBuf>) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
        }
    }
}

/// A device identity: a stable name bound to one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Device (thing) name. Bootstrap identities use the client id.
    pub device_name: String,
    /// Current lifecycle stage.
    pub stage: IdentityStage,
    /// Where the credential lives.
    pub credential: CredentialRef,
}

impl Identity {
    pub fn new(device_name: impl Into<String>, stage: IdentityStage, credential: CredentialRef) -> Self {
        Self {
            device_name: device_name.into(),
            stage,
            credential,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stage == IdentityStage::Active
    }
}

// =============================================================================
// CLUSTER B: CREDENTIALS
// =============================================================================

/// Certificate and private key presented to the secure transport.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredential {
    pub certificate_pem: String,
    pub private_key_pem: String,
}

impl ClientCredential {
    pub fn new(certificate_pem: impl Into<String>, private_key_pem: impl Into<String>) -> Self {
        Self {
            certificate_pem: certificate_pem.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    /// Hex SHA-256 of the certificate PEM. Used as a stable certificate id.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        certificate_fingerprint(&self.certificate_pem)
    }
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredential")
            .field("fingerprint", &self.fingerprint())
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Hex SHA-256 of a certificate PEM.
#[must_use]
pub fn certificate_fingerprint(certificate_pem: &str) -> String {
    hex::encode(Sha256::digest(certificate_pem.as_bytes()))
}

/// Credential bundle returned by an accepted create-credential request.
///
/// The ownership token is single-use: it is consumed by exactly one
/// registration attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredential {
    #[serde(alias = "certificatePem")]
    pub certificate: String,
    pub private_key: String,
    #[serde(alias = "certificateOwnershipToken")]
    pub ownership_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
}

impl IssuedCredential {
    /// Extract the bundle from an accepted outcome payload.
    ///
    /// # Errors
    ///
    /// `PayloadError::MissingField` naming the first absent field.
    pub fn from_response(payload: &Value) -> Result<Self, PayloadError> {
        let certificate = string_field(payload, &["certificate", "certificatePem"])
            .ok_or(PayloadError::MissingField { field: "certificate" })?;
        let private_key = string_field(payload, &["privateKey"])
            .ok_or(PayloadError::MissingField { field: "privateKey" })?;
        let ownership_token =
            string_field(payload, &["ownershipToken", "certificateOwnershipToken"])
                .ok_or(PayloadError::MissingField { field: "ownershipToken" })?;

        Ok(Self {
            certificate,
            private_key,
            ownership_token,
            certificate_id: string_field(payload, &["certificateId"]),
        })
    }

    pub fn client_credential(&self) -> ClientCredential {
        ClientCredential::new(self.certificate.clone(), self.private_key.clone())
    }

    pub fn fingerprint(&self) -> String {
        certificate_fingerprint(&self.certificate)
    }
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("certificate_id", &self.certificate_id)
            .field("fingerprint", &self.fingerprint())
            .field("private_key", &"<redacted>")
            .field("ownership_token", &"<redacted>")
            .finish()
    }
}

fn string_field(payload: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| payload.get(*name).and_then(Value::as_str))
        .find(|value| !value.is_empty())
        .map(str::to_owned)
}

// =============================================================================
// CLUSTER C: REGISTRATION
// =============================================================================

/// Parameter key the provisioning template reads the device name from.
pub const THING_NAME_PARAMETER: &str = "ThingName";

/// Registration request submitted with an ownership token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub ownership_token: String,
    pub parameters: BTreeMap<String, String>,
}

impl RegistrationRequest {
    /// Build a request. A caller-supplied device name is added as the
    /// `ThingName` parameter unless the attributes already carry one.
    pub fn new(
        ownership_token: impl Into<String>,
        attributes: &BTreeMap<String, String>,
        device_name: Option<&str>,
    ) -> Self {
        let mut parameters = attributes.clone();
        if let Some(name) = device_name {
            parameters
                .entry(THING_NAME_PARAMETER.to_string())
                .or_insert_with(|| name.to_string());
        }
        Self {
            ownership_token: ownership_token.into(),
            parameters,
        }
    }

    /// The device name the caller asked for, if any.
    pub fn requested_name(&self) -> Option<&str> {
        self.parameters.get(THING_NAME_PARAMETER).map(String::as_str)
    }
}

/// Accepted registration outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationAccepted {
    #[serde(default)]
    pub thing_name: Option<String>,
    #[serde(default)]
    pub device_configuration: serde_json::Map<String, Value>,
}

impl RegistrationAccepted {
    /// Decode an accepted outcome payload. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// `PayloadError::Invalid` if the payload is not a JSON object.
    pub fn from_response(payload: &Value) -> Result<Self, PayloadError> {
        Ok(serde_json::from_value(payload.clone())?)
    }

    /// The backend-assigned name is authoritative; otherwise fall back to
    /// the caller-supplied one.
    pub fn resolve_device_name(&self, fallback: Option<&str>) -> Option<String> {
        self.thing_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(fallback.filter(|name| !name.is_empty()))
            .map(str::to_owned)
    }
}
