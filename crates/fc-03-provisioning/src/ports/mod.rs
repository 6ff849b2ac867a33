//! Ports of the rotation workflow.
//!
//! The broker side is reached through [`shared_bus::LinkFactory`]; the only
//! port owned here is credential persistence.

use crate::error::ProvisioningResult;
use async_trait::async_trait;
use shared_types::{ClientCredential, CredentialRef, IssuedCredential};

/// Durable storage for credential material.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Durably write an issued certificate and private key with owner-only
    /// access. Returns where they were written.
    async fn persist(&self, issued: &IssuedCredential) -> ProvisioningResult<CredentialRef>;

    /// Read a previously persisted credential.
    async fn load(&self, credential: &CredentialRef) -> ProvisioningResult<ClientCredential>;
}
