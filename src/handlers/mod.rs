//! Project-type handlers
//!
//! Each project type (Go modules, Cargo packages, npm packages) implements
//! [`ProjectHandler`] to expose what the release engine needs: dependency
//! parsing, version read/write, dependency bumps and the build/test/verify
//! commands. Workspaces declare their type in rail.toml and are dispatched
//! through a [`HandlerRegistry`] owned by the composition root.
//!
//! Currently supports:
//! - `go` (go.mod, versions live in tags)
//! - `cargo` (Cargo.toml)
//! - `node` (package.json)

use crate::core::error::{RailError, RailResult, ResultExt};
use semver::Version;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

pub mod cargo;
pub mod go;
pub mod node;
#[cfg(test)]
pub(crate) mod testing;

/// How a dependency is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
  /// Linked/imported as a library
  Library,
  /// Used as a tool or binary artifact
  Binary,
}

/// A dependency declared in a workspace manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
  /// Name as referenced by the manifest (module path, crate or package name)
  pub name: String,
  /// Declared version or requirement, verbatim
  pub version: String,
  pub kind: DependencyKind,
  /// True only for dependencies on sibling workspaces that production code
  /// actually uses. Only these become graph edges.
  pub is_workspace_local: bool,
}

/// Names and identities of every workspace in the ecosystem.
///
/// Handlers consult it to decide whether a dependency is workspace-local.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceIndex {
  references: HashSet<String>,
}

impl WorkspaceIndex {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, reference: impl Into<String>) {
    self.references.insert(reference.into());
  }

  pub fn contains(&self, reference: &str) -> bool {
    self.references.contains(reference)
  }
}

/// Per-project-type adapter
pub trait ProjectHandler: Send + Sync {
  /// Declared type string this handler serves (e.g. "go")
  fn kind(&self) -> &'static str;

  /// Manifest filename (e.g. "go.mod", "Cargo.toml")
  fn manifest_filename(&self) -> &'static str;

  /// True when the workspace has this type's manifest
  fn has_project_file(&self, dir: &Path) -> bool {
    dir.join(self.manifest_filename()).is_file()
  }

  /// Stable external identity (module path, package name), if the type has one
  fn identity(&self, dir: &Path) -> RailResult<Option<String>>;

  /// Parse declared dependencies, flagging the workspace-local ones
  fn parse_dependencies(&self, dir: &Path, index: &WorkspaceIndex) -> RailResult<Vec<Dependency>>;

  /// Point a dependency at `version`: drop any pin/override first, write the
  /// requirement, then run the ecosystem's lock step. A lock failure is an error.
  fn update_dependency(&self, dir: &Path, name: &str, version: &Version) -> RailResult<()>;

  /// Version recorded in the manifest (`None` when the type versions by tag only)
  fn get_version(&self, dir: &Path) -> RailResult<Option<Version>>;

  /// Write `version` to the manifest. Returns the files that changed.
  fn set_version(&self, dir: &Path, version: &Version) -> RailResult<Vec<PathBuf>>;

  /// Files `set_version`/`update_dependency` may rewrite (snapshotted before release)
  fn mutable_files(&self) -> Vec<&'static str>;

  fn build_command(&self) -> Vec<String>;

  fn test_command(&self) -> Vec<String>;

  fn verify_command(&self) -> Vec<String>;

  /// Minimal manifest files for a brand-new workspace
  fn skeleton(&self, name: &str, identity: &str) -> Vec<(PathBuf, String)>;
}

/// Registry of handlers keyed by declared type
pub struct HandlerRegistry {
  handlers: BTreeMap<String, Box<dyn ProjectHandler>>,
}

impl HandlerRegistry {
  /// Empty registry
  pub fn new() -> Self {
    Self {
      handlers: BTreeMap::new(),
    }
  }

  /// Registry with the built-in go, cargo and node handlers
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.register(Box::new(go::GoHandler::new()));
    registry.register(Box::new(cargo::CargoHandler::new()));
    registry.register(Box::new(node::NodeHandler::new()));
    registry
  }

  /// Register (or replace) the handler for its kind
  pub fn register(&mut self, handler: Box<dyn ProjectHandler>) {
    self.handlers.insert(handler.kind().to_string(), handler);
  }

  /// Resolve a handler for a declared type
  pub fn get(&self, kind: &str) -> RailResult<&dyn ProjectHandler> {
    self
      .handlers
      .get(kind)
      .map(|h| h.as_ref())
      .ok_or_else(|| RailError::HandlerNotFound { kind: kind.to_string() })
  }

  pub fn kinds(&self) -> Vec<&str> {
    self.handlers.keys().map(String::as_str).collect()
  }
}

impl Default for HandlerRegistry {
  fn default() -> Self {
    Self::with_defaults()
  }
}

/// Run an ecosystem tool in `dir`, failing with its stderr on non-zero exit
pub(crate) fn run_tool(dir: &Path, program: &str, args: &[&str]) -> RailResult<()> {
  debug!(dir = %dir.display(), program, ?args, "running tool");
  let output = Command::new(program)
    .current_dir(dir)
    .args(args)
    .output()
    .with_context(|| format!("Failed to execute {}", program))?;

  if !output.status.success() {
    return Err(RailError::message(format!(
      "{} {} failed in {}:\n{}",
      program,
      args.join(" "),
      dir.display(),
      String::from_utf8_lossy(&output.stderr).trim()
    )));
  }
  Ok(())
}

pub(crate) fn to_args(parts: &[&str]) -> Vec<String> {
  parts.iter().map(|s| s.to_string()).collect()
}
