//! Remote CI supervision
//!
//! [`CiProvider`] abstracts where run information comes from (the GitHub CLI
//! in production); [`WaitProtocol`] implements the two-phase wait on top.

pub mod provider;
pub mod wait;

pub use provider::{CiProvider, GhCli, WatchOutcome, WorkflowRun};
pub use wait::WaitProtocol;
