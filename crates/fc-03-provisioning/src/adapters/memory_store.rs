//! In-memory credential store for tests and loopback runs.

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::ports::CredentialStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{ClientCredential, CredentialRef, IssuedCredential};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<CredentialRef, ClientCredential>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `persist` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Seed a credential, e.g. the claim credential.
    pub fn insert(&self, reference: CredentialRef, credential: ClientCredential) {
        self.credentials.lock().insert(reference, credential);
    }

    #[must_use]
    pub fn get(&self, reference: &CredentialRef) -> Option<ClientCredential> {
        self.credentials.lock().get(reference).cloned()
    }

    /// Number of successful `persist` calls.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn persist(&self, issued: &IssuedCredential) -> ProvisioningResult<CredentialRef> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProvisioningError::Persistence("store unavailable".to_string()));
        }
        let name = issued
            .certificate_id
            .clone()
            .unwrap_or_else(|| issued.fingerprint());
        let reference = CredentialRef::new(format!("mem/{name}.crt"), format!("mem/{name}.key"));
        self.credentials
            .lock()
            .insert(reference.clone(), issued.client_credential());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(reference)
    }

    async fn load(&self, credential: &CredentialRef) -> ProvisioningResult<ClientCredential> {
        self.get(credential).ok_or_else(|| {
            ProvisioningError::Persistence(format!(
                "no credential at {}",
                credential.certificate_path.display()
            ))
        })
    }
}
