//! Release planning, changelog tracking and execution
//!
//! # Flow
//!
//! 1. `release plan`: analyze every workspace (tags, conventional commits),
//!    pick bumps, propagate patch bumps to dependents, write changelog
//!    sections and persist `.rail/release-plan.json`.
//! 2. Review: edited changelog sections turn the plan entry dirty; `release
//!    changelog` regenerates or accepts them.
//! 3. `release apply`: release level by level (see [`executor`]).
//!
//! # Invariants
//!
//! - Tags are `<prefix>X.Y.Z`; the highest one is the current version.
//! - A changelog moves none -> clean -> dirty, and only an explicit rewrite
//!   makes it clean again.
//! - Dependencies are always released before their dependents.

pub mod changelog;
pub mod executor;
pub mod plan;
pub mod state;

pub use executor::{ApplyOptions, ApplyReport, ReleaseExecutor, ReleasedRepo};
pub use plan::{CommitType, ReleaseCommit, ReleasePlan, RepoReleasePlan, VersionBump};
pub use state::ChangelogState;
