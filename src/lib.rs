//! eco-rail: release a constellation of cross-dependent repositories as one
//! unit, in dependency order.
//!
//! - [`handlers`]: per-ecosystem manifest reading and editing (go, cargo, node)
//! - [`graph`]: dependency graph over the configured workspaces and its levels
//! - [`build`]: bounded, fail-fast concurrent build runner
//! - [`release`]: release plan, changelog tracking and level-by-level apply
//! - [`ci`]: waiting on hosted CI before and after each release
//! - [`scaffold`]: all-or-nothing creation of new repositories

pub mod build;
pub mod ci;
pub mod commands;
pub mod core;
pub mod graph;
pub mod handlers;
pub mod release;
pub mod scaffold;
pub mod ui;
