//! Ecosystem context - build once, pass everywhere
//!
//! # Design
//!
//! `main.rs` builds one `EcosystemContext` (config, handler registry, graph)
//! and hands it to every command by reference. The graph is immutable after
//! construction and shared through `Arc`, so worker threads can read it
//! without copying.
//!
//! ```text
//! main.rs:
//!   EcosystemContext::build() -> &EcosystemContext
//!   |
//!   v
//! commands/build.rs, release.rs, ...:
//!   fn run_*(ctx: &EcosystemContext, ...)
//! ```

use crate::core::config::{RailConfig, WorkspaceConfig};
use crate::core::error::{ConfigError, RailError, RailResult};
use crate::graph::EcosystemGraph;
use crate::handlers::{HandlerRegistry, ProjectHandler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Shared ecosystem-level data, built once at startup.
#[derive(Clone)]
pub struct EcosystemContext {
  /// Ecosystem root directory
  pub root: PathBuf,

  /// The rail.toml that was loaded
  pub config_path: PathBuf,

  pub config: Arc<RailConfig>,

  /// Handlers by workspace type (an instance, never a global)
  pub registry: Arc<HandlerRegistry>,

  /// Dependency graph over the configured workspaces
  pub graph: Arc<EcosystemGraph>,
}

impl EcosystemContext {
  /// Load rail.toml from `root` and build the graph with the default handlers.
  pub fn build(root: &Path) -> RailResult<Self> {
    let config_path = RailConfig::find_config_path(root).ok_or_else(|| {
      RailError::Config(ConfigError::NotFound {
        workspace_root: root.to_path_buf(),
      })
    })?;
    let config = RailConfig::load(root)?;
    Self::from_parts(root, config_path, config, HandlerRegistry::with_defaults())
  }

  /// Assemble a context from already loaded parts
  pub fn from_parts(
    root: &Path,
    config_path: PathBuf,
    config: RailConfig,
    registry: HandlerRegistry,
  ) -> RailResult<Self> {
    let graph = EcosystemGraph::build(root, &config.workspaces, &registry)?;
    debug!(root = %root.display(), workspaces = graph.len(), "ecosystem context ready");

    Ok(Self {
      root: root.to_path_buf(),
      config_path,
      config: Arc::new(config),
      registry: Arc::new(registry),
      graph: Arc::new(graph),
    })
  }

  pub fn workspace(&self, name: &str) -> RailResult<&WorkspaceConfig> {
    self.config.workspace(name)
  }

  /// Handler for a configured workspace
  pub fn handler_for(&self, name: &str) -> RailResult<&dyn ProjectHandler> {
    let ws = self.workspace(name)?;
    self.registry.get(&ws.kind)
  }
}
