//! # Fleet Core Test Suite
//!
//! Cross-crate scenarios driven through the in-memory broker and the
//! loopback backend.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs     # broker, backend and observer fixtures
//!     ├── correlator.rs  # request/response over the broker
//!     ├── rotation.rs    # claim → production identity
//!     └── lifecycle.rs   # commands, heartbeats, last will
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p fleet-tests
//! cargo test -p fleet-tests integration::rotation::
//! ```

pub mod integration;
