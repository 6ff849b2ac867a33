//! # fc-02-shadow-sync
//!
//! Keeps the backend's shadow document in step with what the device
//! believes it last reported.
//!
//! ## Version Discipline
//!
//! The synchronizer owns a local `reported.version` counter:
//!
//! - every successful [`ShadowSynchronizer::report`] raises it by exactly 1
//! - a report whose publish fails does not consume a number
//! - [`ShadowSynchronizer::seed_version`] may raise it (e.g. from the remote
//!   document at startup) but never lowers it
//!
//! ## Missing Shadows
//!
//! A read rejected with code 404 means the shadow was never created.
//! [`ShadowSynchronizer::get_or_bootstrap`] writes one minimal marker
//! document, waits for the update to be accepted, and reads once more.
//! It never loops.
//!
//! The `desired` half of the document is not reconciled here.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod domain;
pub mod error;
pub mod service;

pub use domain::{bootstrap_marker, build_report, ShadowReport};
pub use error::{ShadowError, ShadowResult};
pub use service::{ShadowConfig, ShadowSync, ShadowSynchronizer};
