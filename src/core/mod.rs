//! Core building blocks shared by every command
//!
//! - **cancel**: one-shot cancellation token shared by workers and CI waits
//! - **config**: rail.toml parsing and validation
//! - **context**: ecosystem context built once in main.rs
//! - **error**: error types with contextual help and exit codes
//! - **telemetry**: tracing subscriber setup
//! - **vcs**: git operations (SystemGit)

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod telemetry;
pub mod vcs;
