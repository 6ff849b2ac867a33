//! # fc-03-provisioning
//!
//! Exchanges the fleet-wide claim credential for a device-specific
//! production credential and proves the new credential works.
//!
//! ## Workflow
//!
//! ```text
//! [Start] ──connect claim, subscribe outcomes──→ [BootstrapConnected]
//!    ──create credential, persist──→ [CredentialIssued]
//!    ──register with ownership token──→ [Registered]
//!    ──reconnect with new credential, shadow get (404 → create once)──→ [Verified]
//!
//! any step ──error──→ [Failed]  (report keeps the last completed step)
//! ```
//!
//! ## Partial Progress
//!
//! The issued credential is persisted before registration is attempted and
//! is reported back on failure. A caller re-running the workflow passes it as
//! `resume` so the same ownership token is reused instead of requesting a
//! new credential. Nothing is retried automatically.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use adapters::{FileCredentialStore, InMemoryCredentialStore};
pub use domain::identities::DeviceIdentities;
pub use domain::report::RotationReport;
pub use domain::stage::RotationStage;
pub use error::{ProvisioningError, ProvisioningResult};
pub use ports::CredentialStore;
pub use service::{RotationConfig, RotationWorkflow, ECHO_MARKER};
