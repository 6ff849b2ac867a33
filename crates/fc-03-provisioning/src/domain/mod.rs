//! Workflow stages, identity bookkeeping and the run report.

pub mod identities;
pub mod report;
pub mod stage;
