//! Subscriber installation.
//!
//! Human-readable output for development, JSON lines (one object per event,
//! with target, file and line) when `json_logs` is set.

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter {
        filter: config.log_level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber. Output goes to stderr.
///
/// # Errors
///
/// `Filter` for an unparseable directive, `AlreadyInitialized` if a global
/// subscriber is already set.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = env_filter(config)?;
    let init_err = |e: tracing_subscriber::util::TryInitError| {
        TelemetryError::AlreadyInitialized(e.to_string())
    };

    if !config.console_output {
        tracing_subscriber::registry()
            .with(env_filter)
            .try_init()
            .map_err(init_err)?;
    } else if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(init_err)?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(init_err)?;
    }

    tracing::info!(
        service = %config.service_name,
        device = config.device_name.as_deref().unwrap_or("-"),
        level = %config.log_level,
        json = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = TelemetryConfig {
            log_level: "shared_bus=loud".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(matches!(
            env_filter(&config),
            Err(TelemetryError::Filter { .. })
        ));
    }

    #[test]
    fn test_valid_filter_accepted() {
        let config = TelemetryConfig {
            log_level: "fc_04_lifecycle=debug,info".to_string(),
            ..TelemetryConfig::default()
        };
        assert!(env_filter(&config).is_ok());
    }
}
