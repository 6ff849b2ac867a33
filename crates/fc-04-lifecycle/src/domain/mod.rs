//! Lifecycle domain logic, free of I/O.

pub mod state;
