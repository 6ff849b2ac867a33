//! # Device Configuration
//!
//! One typed section per concern. Defaults are the production constants;
//! `FLEET_*` environment variables override them.
//!
//! | Variable | Section field |
//! |---|---|
//! | `FLEET_ENDPOINT` | `broker.endpoint` |
//! | `FLEET_KEEP_ALIVE_SECS` | `broker.keep_alive` |
//! | `FLEET_CONNECT_TIMEOUT_SECS` | `broker.connect_timeout` |
//! | `FLEET_SUBSCRIBE_TIMEOUT_SECS` | `broker.subscribe_timeout` |
//! | `FLEET_PUBLISH_TIMEOUT_SECS` | `broker.publish_timeout` |
//! | `FLEET_RESERVED_PREFIX` | `broker.reserved_prefix` |
//! | `FLEET_APP_PREFIX` | `broker.app_prefix` |
//! | `FLEET_DEVICE_NAME` | `identity.device_name` |
//! | `FLEET_CLAIM_CERT` / `FLEET_CLAIM_KEY` | `identity.claim_*` |
//! | `FLEET_CREDENTIAL_DIR` | `identity.credential_dir` |
//! | `FLEET_TEMPLATE_NAME` | `provisioning.template_name` |
//! | `FLEET_SHADOW_NAME` | `provisioning.shadow_name` |
//! | `FLEET_ATTRIBUTES` | `provisioning.attributes` (`k=v,k=v`) |
//! | `FLEET_VERIFY_ECHO` | `provisioning.verify_echo` |
//! | `FLEET_HEARTBEAT_SECS` | `lifecycle.heartbeat_interval` |
//! | `FLEET_MOVING_SECS` | `lifecycle.moving_duration` |
//! | `FLEET_RECONNECT_SECS` | `lifecycle.reconnect_delay` |
//! | `FLEET_MAX_RECONNECT_SECS` | `lifecycle.max_reconnect_delay` |

use fc_03_provisioning::{FileCredentialStore, RotationConfig};
use fc_04_lifecycle::LifecycleConfig;
use shared_bus::SessionConfig;
use shared_types::{CredentialRef, TopicScheme};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must not be zero")]
    ZeroDuration { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    /// `run` needs the device name assigned at registration.
    #[error("Device name is not configured (set FLEET_DEVICE_NAME)")]
    MissingDeviceName,
}

/// Complete device configuration.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub broker: BrokerConfig,
    pub identity: IdentityConfig,
    pub provisioning: ProvisioningSettings,
    pub lifecycle: LifecycleSettings,
}

/// Broker connection and topic layout.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// `host:port` handed to the link factory.
    pub endpoint: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub subscribe_timeout: Duration,
    pub publish_timeout: Duration,
    pub reserved_prefix: String,
    pub app_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:8883".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(20),
            subscribe_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(10),
            reserved_prefix: shared_types::DEFAULT_RESERVED_PREFIX.to_string(),
            app_prefix: shared_types::DEFAULT_APP_PREFIX.to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: self.connect_timeout,
            subscribe_timeout: self.subscribe_timeout,
            publish_timeout: self.publish_timeout,
            ..SessionConfig::default()
        }
    }

    pub fn topic_scheme(&self) -> TopicScheme {
        TopicScheme::new(&self.reserved_prefix, &self.app_prefix)
    }
}

/// Where credentials live.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Registered device name. Optional for `provision`, required for `run`.
    pub device_name: Option<String>,
    pub claim_certificate: PathBuf,
    pub claim_private_key: PathBuf,
    /// Directory the production credential is written to.
    pub credential_dir: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            claim_certificate: PathBuf::from("./certs/claim.crt"),
            claim_private_key: PathBuf::from("./certs/claim.key"),
            credential_dir: PathBuf::from("./certs"),
        }
    }
}

impl IdentityConfig {
    pub fn claim_ref(&self) -> CredentialRef {
        CredentialRef::new(&self.claim_certificate, &self.claim_private_key)
    }

    pub fn file_store(&self) -> FileCredentialStore {
        FileCredentialStore::new(&self.credential_dir)
    }

    /// # Errors
    ///
    /// `MissingDeviceName` when unset.
    pub fn require_device_name(&self) -> Result<&str, ConfigError> {
        self.device_name
            .as_deref()
            .ok_or(ConfigError::MissingDeviceName)
    }
}

/// Rotation workflow parameters.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub template_name: String,
    pub shadow_name: String,
    pub attributes: BTreeMap<String, String>,
    pub create_timeout: Duration,
    pub register_timeout: Duration,
    pub shadow_timeout: Duration,
    pub echo_timeout: Duration,
    pub verify_echo: bool,
    pub reconnect_delay: Duration,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            template_name: "amr-prod-template".to_string(),
            shadow_name: "robot".to_string(),
            attributes: BTreeMap::new(),
            create_timeout: Duration::from_secs(20),
            register_timeout: Duration::from_secs(30),
            shadow_timeout: Duration::from_secs(20),
            echo_timeout: Duration::from_secs(10),
            verify_echo: true,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Lifecycle runtime timers.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub heartbeat_interval: Duration,
    pub moving_duration: Duration,
    /// First backoff step after a dropped connection.
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            moving_duration: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

impl DeviceConfig {
    /// Defaults with `FLEET_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// `InvalidValue` for an unparseable number or flag.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// [`Self::from_env`] over an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// `InvalidValue` for an unparseable number or flag.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let text = |var: &str| lookup(var).filter(|value| !value.is_empty());

        if let Some(endpoint) = text("FLEET_ENDPOINT") {
            config.broker.endpoint = endpoint;
        }
        override_secs(&lookup, "FLEET_KEEP_ALIVE_SECS", &mut config.broker.keep_alive)?;
        override_secs(&lookup, "FLEET_CONNECT_TIMEOUT_SECS", &mut config.broker.connect_timeout)?;
        override_secs(
            &lookup,
            "FLEET_SUBSCRIBE_TIMEOUT_SECS",
            &mut config.broker.subscribe_timeout,
        )?;
        override_secs(&lookup, "FLEET_PUBLISH_TIMEOUT_SECS", &mut config.broker.publish_timeout)?;
        if let Some(prefix) = lookup("FLEET_RESERVED_PREFIX") {
            config.broker.reserved_prefix = prefix;
        }
        if let Some(prefix) = text("FLEET_APP_PREFIX") {
            config.broker.app_prefix = prefix;
        }

        config.identity.device_name = text("FLEET_DEVICE_NAME");
        if let Some(path) = text("FLEET_CLAIM_CERT") {
            config.identity.claim_certificate = PathBuf::from(path);
        }
        if let Some(path) = text("FLEET_CLAIM_KEY") {
            config.identity.claim_private_key = PathBuf::from(path);
        }
        if let Some(path) = text("FLEET_CREDENTIAL_DIR") {
            config.identity.credential_dir = PathBuf::from(path);
        }

        if let Some(template) = text("FLEET_TEMPLATE_NAME") {
            config.provisioning.template_name = template;
        }
        if let Some(shadow) = text("FLEET_SHADOW_NAME") {
            config.provisioning.shadow_name = shadow;
        }
        if let Some(attributes) = text("FLEET_ATTRIBUTES") {
            config.provisioning.attributes = parse_attributes(&attributes)?;
        }
        if let Some(flag) = text("FLEET_VERIFY_ECHO") {
            config.provisioning.verify_echo = parse_flag("FLEET_VERIFY_ECHO", &flag)?;
        }

        override_secs(
            &lookup,
            "FLEET_HEARTBEAT_SECS",
            &mut config.lifecycle.heartbeat_interval,
        )?;
        override_secs(&lookup, "FLEET_MOVING_SECS", &mut config.lifecycle.moving_duration)?;
        override_secs(
            &lookup,
            "FLEET_RECONNECT_SECS",
            &mut config.lifecycle.reconnect_delay,
        )?;
        override_secs(
            &lookup,
            "FLEET_MAX_RECONNECT_SECS",
            &mut config.lifecycle.max_reconnect_delay,
        )?;

        Ok(config)
    }

    /// # Errors
    ///
    /// `ZeroDuration` or `Empty` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("broker.keep_alive", self.broker.keep_alive),
            ("broker.connect_timeout", self.broker.connect_timeout),
            ("broker.subscribe_timeout", self.broker.subscribe_timeout),
            ("broker.publish_timeout", self.broker.publish_timeout),
            ("provisioning.create_timeout", self.provisioning.create_timeout),
            ("provisioning.register_timeout", self.provisioning.register_timeout),
            ("provisioning.shadow_timeout", self.provisioning.shadow_timeout),
            ("provisioning.echo_timeout", self.provisioning.echo_timeout),
            ("lifecycle.heartbeat_interval", self.lifecycle.heartbeat_interval),
            ("lifecycle.moving_duration", self.lifecycle.moving_duration),
            ("lifecycle.reconnect_delay", self.lifecycle.reconnect_delay),
            ("lifecycle.max_reconnect_delay", self.lifecycle.max_reconnect_delay),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::ZeroDuration { field: *field });
        }

        let names = [
            ("broker.endpoint", &self.broker.endpoint),
            ("broker.app_prefix", &self.broker.app_prefix),
            ("provisioning.template_name", &self.provisioning.template_name),
            ("provisioning.shadow_name", &self.provisioning.shadow_name),
        ];
        if let Some((field, _)) = names.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Empty { field: *field });
        }
        if matches!(&self.identity.device_name, Some(name) if name.trim().is_empty()) {
            return Err(ConfigError::Empty {
                field: "identity.device_name",
            });
        }
        Ok(())
    }

    pub fn rotation_config(&self) -> RotationConfig {
        let provisioning = &self.provisioning;
        RotationConfig {
            topics: self.broker.topic_scheme(),
            template_name: provisioning.template_name.clone(),
            shadow_name: provisioning.shadow_name.clone(),
            device_name: self.identity.device_name.clone(),
            attributes: provisioning.attributes.clone(),
            create_timeout: provisioning.create_timeout,
            register_timeout: provisioning.register_timeout,
            shadow_timeout: provisioning.shadow_timeout,
            echo_timeout: provisioning.echo_timeout,
            verify_echo: provisioning.verify_echo,
            reconnect_delay: provisioning.reconnect_delay,
            session: self.broker.session_config(),
        }
    }

    pub fn lifecycle_config(&self, device_name: &str) -> LifecycleConfig {
        LifecycleConfig {
            device_name: device_name.to_string(),
            topics: self.broker.topic_scheme(),
            shadow_name: self.provisioning.shadow_name.clone(),
            heartbeat_interval: self.lifecycle.heartbeat_interval,
            moving_duration: self.lifecycle.moving_duration,
            shadow_timeout: self.provisioning.shadow_timeout,
            reconnect_delay: self.lifecycle.reconnect_delay,
            max_reconnect_delay: self
                .lifecycle
                .max_reconnect_delay
                .max(self.lifecycle.reconnect_delay),
        }
    }
}

fn override_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    target: &mut Duration,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(var).filter(|value| !value.is_empty()) {
        let secs: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var,
            value: value.clone(),
        })?;
        *target = Duration::from_secs(secs);
    }
    Ok(())
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_attributes(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, val)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), val.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue {
                var: "FLEET_ATTRIBUTES",
                value: pair.to_string(),
            }),
        })
        .collect()
}
