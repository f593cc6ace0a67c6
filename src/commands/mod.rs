//! CLI commands for eco-rail
//!
//! ## Inspection
//! - **graph**: Dependency graph and build levels
//!
//! ## Building
//! - **build**: Build, test or verify every workspace level by level
//!
//! ## Releases
//! - **release plan / status / changelog**: Plan bumps and review changelogs
//! - **release apply**: Release in dependency order with CI gating
//! - **release wait**: Wait for a repository's CI
//!
//! ## Scaffolding
//! - **new**: Create a repository with all-or-nothing rollback
//!
//! All commands accept `&EcosystemContext` to avoid rebuilding the graph.

pub mod build;
pub mod graph;
pub mod new;
pub mod release;

pub use build::run_build;
pub use graph::run_graph;
pub use new::{NewOptions, run_new};
pub use release::{run_release_apply, run_release_changelog, run_release_plan, run_release_status, run_release_wait};
