//! Scenario tests across crates.

pub mod harness;

mod correlator;
mod lifecycle;
mod rotation;
