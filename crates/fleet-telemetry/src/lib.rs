//! # Fleet Telemetry
//!
//! Logging setup shared by the fleet device binaries. Every crate logs
//! through `tracing`; this crate only installs the subscriber.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleet_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     init_logging(&TelemetryConfig::from_env()).expect("logging");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FLEET_LOG_LEVEL` | `info` | Filter directive, wins over `RUST_LOG` |
//! | `RUST_LOG` | | Used when `FLEET_LOG_LEVEL` is unset |
//! | `FLEET_JSON_LOGS` | `false` | JSON lines instead of human-readable output |
//! | `FLEET_DEVICE_NAME` | | Added as a field to every event |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Log a device-scoped event with the standard `device` field.
///
/// ```rust,ignore
/// log_device_event!(info, "AMR-001", "Rotation finished", stage = %stage);
/// ```
#[macro_export]
macro_rules! log_device_event {
    ($level:ident, $device:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            device = %$device,
            $($($field)*,)?
            $msg
        )
    };
}
