//! # fc-04-lifecycle
//!
//! Runs the device side of the fleet protocol once a production identity
//! is active.
//!
//! ## State Machine
//!
//! ```text
//!            command                 return timer
//!   idle ───────────────→ moving ───────────────→ idle
//!     │                     │ command: ignored
//!     └──── shutdown ───────┴──────────→ offline (terminal)
//! ```
//!
//! Every transition publishes a shadow report followed by a retained
//! status. The heartbeat republishes the current status on a fixed period
//! whether or not anything changed.
//!
//! ## Reconnection
//!
//! An unexpected drop lets the broker publish the `offline` will. The
//! connection supervisor reopens the session with doubling delays, then
//! resubscribes to commands, resyncs the shadow and republishes the
//! current status. A session closed by shutdown is never reopened.
//!
//! ## Serialization
//!
//! The command handler, the return timer and the heartbeat all take the
//! same state lock and keep it until their publications are acknowledged,
//! so a status payload never mixes two states.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod domain;
pub mod error;
pub mod metrics;
pub mod service;

pub use domain::state::{CommandOutcome, DeviceState};
pub use error::{LifecycleError, LifecycleResult};
pub use metrics::LifecycleStats;
pub use service::{LifecycleConfig, LifecycleMachine};
