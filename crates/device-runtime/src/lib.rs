//! # Device Runtime Library
//!
//! Configuration, wiring and the loopback backend behind the
//! `fleet-device` binary. Exposed as a library for the scenario tests.
//!
//! ## Modes
//!
//! - `provision`: claim credential → issued credential → registered
//!   identity → verified production connection
//! - `run`: the lifecycle runtime on the production identity
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, then `FLEET_*` environment)
//! 2. Validate it
//! 3. Resolve the link factory (external, or the in-memory broker)
//! 4. Run the selected mode until it finishes or Ctrl+C

pub mod config;
pub mod error;
pub mod loopback;
pub mod runtime;

pub use config::{
    BrokerConfig, ConfigError, DeviceConfig, IdentityConfig, LifecycleSettings,
    ProvisioningSettings,
};
pub use error::{RuntimeError, RuntimeResult};
pub use loopback::{LoopbackBackend, LoopbackConfig};
pub use runtime::DeviceRuntime;
