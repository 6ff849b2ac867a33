//! # Shadow Synchronizer

use crate::domain::{bootstrap_marker, build_report, ShadowReport};
use crate::error::{ShadowError, ShadowResult};
use fc_01_correlator::{Correlator, Outcome};
use serde_json::{json, Map, Value};
use shared_types::{now_millis, now_secs, Rejection, ShadowDocument, TopicScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Which shadow to synchronize and how long to wait for the backend.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    pub device_name: String,
    /// Named shadow. Default: `robot`.
    pub shadow_name: String,
    /// Deadline for each get/update outcome. Default: 20s.
    pub timeout: Duration,
    pub topics: TopicScheme,
}

impl ShadowConfig {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            shadow_name: "robot".to_string(),
            timeout: Duration::from_secs(20),
            topics: TopicScheme::default(),
        }
    }
}

/// Result of [`ShadowSynchronizer::get_or_bootstrap`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowSync {
    pub document: ShadowDocument,
    /// True if the shadow had to be created first.
    pub bootstrapped: bool,
}

pub struct ShadowSynchronizer {
    correlator: Arc<Correlator>,
    config: ShadowConfig,
    /// Last committed `reported.version`. Held across the publish so that
    /// reports are serialized.
    version: Mutex<u64>,
}

impl ShadowSynchronizer {
    pub fn new(correlator: Arc<Correlator>, config: ShadowConfig) -> Self {
        Self {
            correlator,
            config,
            version: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Last committed version (0 before the first report).
    pub async fn version(&self) -> u64 {
        *self.version.lock().await
    }

    /// Raise the local counter to at least `version`. Returns the counter.
    pub async fn seed_version(&self, version: u64) -> u64 {
        let mut current = self.version.lock().await;
        if version > *current {
            debug!(from = *current, to = version, "Seeding shadow version");
            *current = version;
        }
        *current
    }

    /// Publish `local` as the next reported version.
    ///
    /// # Errors
    ///
    /// `Transport` if the publish is not acknowledged. The version is not
    /// consumed in that case.
    pub async fn report(&self, local: &Map<String, Value>) -> ShadowResult<ShadowReport> {
        let mut version = self.version.lock().await;
        let next = *version + 1;
        let updated_at = now_millis();
        let document = build_report(local, next, updated_at);

        let topics = self
            .config
            .topics
            .shadow_update(&self.config.device_name, &self.config.shadow_name);
        self.correlator
            .session()
            .publish_json(&topics.request, &document, false)
            .await?;

        *version = next;
        debug!(version = next, "Shadow reported");
        Ok(ShadowReport {
            version: next,
            updated_at,
            document,
        })
    }

    /// Read the shadow document.
    ///
    /// # Errors
    ///
    /// - `NotFound` for a 404 rejection
    /// - `Rejected` for any other rejection
    /// - `Correlator` on timeout or transport failure
    pub async fn get(&self) -> ShadowResult<ShadowDocument> {
        let topics = self
            .config
            .topics
            .shadow_get(&self.config.device_name, &self.config.shadow_name);
        let outcome = self
            .correlator
            .call(&topics, &json!({}), self.config.timeout)
            .await?;

        let payload = accepted_or_error(outcome)?;
        ShadowDocument::from_response(&payload)
            .map_err(|err| ShadowError::Malformed(err.to_string()))
    }

    /// Create the shadow with a minimal marker document and wait for the
    /// update to be accepted.
    ///
    /// # Errors
    ///
    /// `Rejected` if the update is rejected, `Correlator` on timeout.
    pub async fn bootstrap_if_missing(&self) -> ShadowResult<()> {
        let topics = self
            .config
            .topics
            .shadow_update(&self.config.device_name, &self.config.shadow_name);
        info!(device = %self.config.device_name, "Shadow missing, writing initial document");

        let outcome = self
            .correlator
            .call(&topics, &bootstrap_marker(now_secs()), self.config.timeout)
            .await?;
        accepted_or_error(outcome).map(|_| ())
    }

    /// [`Self::get`], with one bootstrap-and-retry cycle on `NotFound`.
    ///
    /// # Errors
    ///
    /// As [`Self::get`]. A second `NotFound` is returned as is.
    pub async fn get_or_bootstrap(&self) -> ShadowResult<ShadowSync> {
        match self.get().await {
            Ok(document) => Ok(ShadowSync {
                document,
                bootstrapped: false,
            }),
            Err(ShadowError::NotFound) => {
                self.bootstrap_if_missing().await?;
                let document = self.get().await.inspect_err(|err| {
                    warn!(error = %err, "Shadow read failed after bootstrap");
                })?;
                Ok(ShadowSync {
                    document,
                    bootstrapped: true,
                })
            }
            Err(err) => Err(err),
        }
    }
}

fn accepted_or_error(outcome: Outcome) -> ShadowResult<Value> {
    outcome.into_accepted().map_err(|rejection: Rejection| {
        if rejection.is_not_found() {
            ShadowError::NotFound
        } else {
            ShadowError::Rejected {
                code: rejection.code,
                message: rejection.message,
            }
        }
    })
}
