//! Outcome values and the pending-call table.

pub mod outcome;
pub mod pending;
