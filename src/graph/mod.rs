//! Ecosystem dependency graph and release ordering
//!
//! Built from project handlers + petgraph. Nodes are workspaces, edges are
//! workspace-local dependencies.

pub mod ecosystem_graph;
pub mod levels;

pub use ecosystem_graph::{EcosystemGraph, WorkspaceNode};
pub use levels::topological_levels;
