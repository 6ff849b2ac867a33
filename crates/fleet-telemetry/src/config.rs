//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,

    /// Device the process acts for, if known
    pub device_name: Option<String>,

    /// `EnvFilter` directive (e.g. `info`, `shared_bus=debug,info`)
    pub log_level: String,

    /// Whether to emit JSON lines
    pub json_logs: bool,

    /// Whether to write to stderr at all
    pub console_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "fleet-device".to_string(),
            device_name: None,
            log_level: "info".to_string(),
            json_logs: false,
            console_output: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// - `FLEET_LOG_LEVEL`, else `RUST_LOG`, else `info`
    /// - `FLEET_JSON_LOGS`: `true`/`1` enables JSON output
    /// - `FLEET_CONSOLE_OUTPUT`: `false`/`0` silences output
    /// - `FLEET_DEVICE_NAME`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// [`Self::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            service_name: defaults.service_name,

            device_name: lookup("FLEET_DEVICE_NAME").filter(|name| !name.is_empty()),

            log_level: lookup("FLEET_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .filter(|level| !level.is_empty())
                .unwrap_or(defaults.log_level),

            json_logs: lookup("FLEET_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.json_logs),

            console_output: lookup("FLEET_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(defaults.console_output),
        }
    }

    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }
}
