//! # Shared Types Crate
//!
//! This crate contains the device data model used by every component of
//! the fleet connectivity core.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: identities, credentials, shadow documents,
//!   command and status payloads are defined here once.
//! - **Wire Compatibility**: payload types serialize to the JSON shapes the
//!   fleet backend speaks (camelCase field names).
//! - **Topic Contract**: every topic string is built by [`TopicScheme`];
//!   no component formats topics by hand.

pub mod entities;
pub mod errors;
pub mod payloads;
pub mod topics;

pub use entities::*;
pub use errors::*;
pub use payloads::*;
pub use topics::*;

/// Milliseconds since the Unix epoch, the timestamp unit of every payload.
#[must_use]
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
