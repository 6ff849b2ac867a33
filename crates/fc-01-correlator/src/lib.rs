//! # fc-01-correlator
//!
//! Synchronous request/response on top of one-way publish/subscribe topics.
//!
//! ## Overview
//!
//! Every backend "RPC" has a request topic and a sibling outcome pair
//! (`.../accepted`, `.../rejected`). A call:
//!
//! 1. claims the outcome pair (a second concurrent claim fails with `Busy`)
//! 2. subscribes to both outcome topics and waits for the SubAcks
//! 3. publishes the request
//! 4. waits for the first delivery on either outcome topic, or the deadline
//!
//! ```text
//! call() ──claim──→ [PendingOutcomes] ←──resolve── [router task] ←── session inbound
//!    │                                                               ▲
//!    └──subscribe(accepted, rejected)──→ publish(request) ──────────┘
//! ```
//!
//! Rejections are returned as an [`Outcome`] with [`OutcomeKind::Rejected`],
//! not as errors: "already registered" or "shadow not found" are expected
//! answers the caller decides about.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod domain;
pub mod error;
pub mod service;

pub use domain::outcome::{Outcome, OutcomeKind};
pub use domain::pending::{CorrelatorStats, PendingOutcomes};
pub use error::{CorrelatorError, CorrelatorResult};
pub use service::Correlator;
