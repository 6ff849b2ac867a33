//! Filesystem credential store.
//!
//! Each file is written to a temporary sibling created with mode 0600,
//! flushed to disk, then renamed over the destination. A crash leaves
//! either the old file or the complete new one.

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::ports::CredentialStore;
use async_trait::async_trait;
use shared_types::{ClientCredential, CredentialRef, IssuedCredential};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_CERTIFICATE_FILE: &str = "new_production.crt";
pub const DEFAULT_PRIVATE_KEY_FILE: &str = "new_production.key";
/// Issued but not yet registered bundle, kept for a later resume.
pub const ISSUED_FILE: &str = "issued.json";

/// Writes credentials under one directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    directory: PathBuf,
    certificate_file: String,
    private_key_file: String,
}

impl FileCredentialStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            certificate_file: DEFAULT_CERTIFICATE_FILE.to_string(),
            private_key_file: DEFAULT_PRIVATE_KEY_FILE.to_string(),
        }
    }

    #[must_use]
    pub fn with_file_names(
        mut self,
        certificate_file: impl Into<String>,
        private_key_file: impl Into<String>,
    ) -> Self {
        self.certificate_file = certificate_file.into();
        self.private_key_file = private_key_file.into();
        self
    }

    #[must_use]
    pub fn credential_ref(&self) -> CredentialRef {
        CredentialRef::new(
            self.directory.join(&self.certificate_file),
            self.directory.join(&self.private_key_file),
        )
    }

    #[must_use]
    pub fn issued_path(&self) -> PathBuf {
        self.directory.join(ISSUED_FILE)
    }

    /// Keep an issued bundle (with its ownership token) so a failed
    /// registration can be retried without requesting a new credential.
    ///
    /// # Errors
    ///
    /// `Persistence` if the file cannot be written.
    pub fn save_issued(&self, issued: &IssuedCredential) -> ProvisioningResult<PathBuf> {
        fs::create_dir_all(&self.directory).map_err(|err| persistence(&self.directory, err))?;
        let path = self.issued_path();
        let contents = serde_json::to_string(issued)
            .map_err(|err| ProvisioningError::Persistence(err.to_string()))?;
        write_private(&path, &contents)?;
        info!(path = %path.display(), "Issued credential kept for resume");
        Ok(path)
    }

    /// The bundle saved by [`Self::save_issued`], if any.
    ///
    /// # Errors
    ///
    /// `Persistence` if the file exists but cannot be read or decoded.
    pub fn load_issued(&self) -> ProvisioningResult<Option<IssuedCredential>> {
        let path = self.issued_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path).map_err(|err| persistence(&path, err))?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| ProvisioningError::Persistence(format!("{}: {err}", path.display())))
    }

    /// Drop the saved bundle once it has been registered.
    ///
    /// # Errors
    ///
    /// `Persistence` if the file exists but cannot be removed.
    pub fn clear_issued(&self) -> ProvisioningResult<()> {
        let path = self.issued_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence(&path, err)),
        }
    }
}

fn persistence(path: &Path, err: std::io::Error) -> ProvisioningError {
    ProvisioningError::Persistence(format!("{}: {err}", path.display()))
}

fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Write `contents` to `path` atomically with owner-only permissions.
fn write_private(path: &Path, contents: &str) -> ProvisioningResult<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    let mut file = open_private(&staging).map_err(|err| persistence(&staging, err))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|err| persistence(&staging, err))?;
    }
    file.write_all(contents.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|err| persistence(&staging, err))?;
    drop(file);

    fs::rename(&staging, path).map_err(|err| persistence(path, err))
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn persist(&self, issued: &IssuedCredential) -> ProvisioningResult<CredentialRef> {
        fs::create_dir_all(&self.directory).map_err(|err| persistence(&self.directory, err))?;

        let reference = self.credential_ref();
        write_private(&reference.private_key_path, &issued.private_key)?;
        write_private(&reference.certificate_path, &issued.certificate)?;

        info!(
            certificate = %reference.certificate_path.display(),
            private_key = %reference.private_key_path.display(),
            fingerprint = %issued.fingerprint(),
            "Production credential persisted"
        );
        Ok(reference)
    }

    async fn load(&self, credential: &CredentialRef) -> ProvisioningResult<ClientCredential> {
        let certificate = fs::read_to_string(&credential.certificate_path)
            .map_err(|err| persistence(&credential.certificate_path, err))?;
        let private_key = fs::read_to_string(&credential.private_key_path)
            .map_err(|err| persistence(&credential.private_key_path, err))?;
        Ok(ClientCredential::new(certificate, private_key))
    }
}
