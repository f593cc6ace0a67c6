//! Ecosystem dependency graph built from handler output + petgraph
//!
//! ## Graph Structure
//!
//! - **Directed Graph**: `A → B` means "A depends on B"
//! - **Nodes**: Configured workspaces whose manifest exists
//! - **Edges**: Workspace-local dependencies only, one edge per pair
//! - **Index**: Workspace name → node, identity (module path / package name) → name
//!
//! Construction is two passes: nodes first, so that every identity is known
//! before any dependency is resolved against it. The graph is read-only once
//! built.

use crate::core::config::WorkspaceConfig;
use crate::core::error::{RailError, RailResult};
use crate::handlers::{HandlerRegistry, WorkspaceIndex};
use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A workspace in the ecosystem graph.
#[derive(Debug, Clone)]
pub struct WorkspaceNode {
  pub name: String,
  /// External identity when it differs from `name`
  pub identity: Option<String>,
  pub dir: PathBuf,
  /// Declared project type
  pub kind: String,
  /// Names of sibling workspaces this one depends on, sorted
  pub dependencies: Vec<String>,
}

/// Ecosystem dependency graph.
pub struct EcosystemGraph {
  graph: DiGraph<WorkspaceNode, ()>,

  /// Index: workspace name → node index
  name_to_node: HashMap<String, NodeIndex>,
}

impl EcosystemGraph {
  /// Build the graph from configured workspaces.
  ///
  /// Workspaces whose manifest is missing are skipped. An unknown declared
  /// type fails with [`RailError::HandlerNotFound`].
  pub fn build(root: &Path, workspaces: &[WorkspaceConfig], registry: &HandlerRegistry) -> RailResult<Self> {
    let mut graph = DiGraph::new();
    let mut name_to_node = HashMap::new();
    let mut identity_to_name: HashMap<String, String> = HashMap::new();
    let mut index = WorkspaceIndex::new();

    // Pass 1: nodes + identity map
    for ws in workspaces {
      let handler = registry.get(&ws.kind)?;
      let dir = ws.dir(root);

      if !handler.has_project_file(&dir) {
        debug!(workspace = %ws.name, dir = %dir.display(), "no {} found, skipping", handler.manifest_filename());
        continue;
      }

      let identity = handler.identity(&dir)?.filter(|id| id != &ws.name);
      if let Some(id) = &identity {
        identity_to_name.insert(id.clone(), ws.name.clone());
        index.insert(id.clone());
      }
      index.insert(ws.name.clone());

      let idx = graph.add_node(WorkspaceNode {
        name: ws.name.clone(),
        identity,
        dir,
        kind: ws.kind.clone(),
        dependencies: Vec::new(),
      });
      name_to_node.insert(ws.name.clone(), idx);
    }

    // Pass 2: edges
    let indices: Vec<NodeIndex> = graph.node_indices().collect();
    for from in indices {
      let (dir, kind, name) = {
        let node = &graph[from];
        (node.dir.clone(), node.kind.clone(), node.name.clone())
      };
      let handler = registry.get(&kind)?;

      let mut resolved = BTreeSet::new();
      for dep in handler.parse_dependencies(&dir, &index)? {
        if !dep.is_workspace_local {
          continue;
        }
        let target = identity_to_name
          .get(&dep.name)
          .cloned()
          .or_else(|| name_to_node.contains_key(&dep.name).then(|| dep.name.clone()));

        let Some(target) = target else {
          debug!(workspace = %name, dependency = %dep.name, "local dependency has no node, ignoring");
          continue;
        };
        if target == name {
          continue;
        }
        if let Some(&to) = name_to_node.get(&target) {
          graph.update_edge(from, to, ());
          resolved.insert(target);
        }
      }
      graph[from].dependencies = resolved.into_iter().collect();
    }

    debug!(nodes = graph.node_count(), edges = graph.edge_count(), "built ecosystem graph");
    Ok(Self { graph, name_to_node })
  }

  /// Build a graph directly from `(name, dependencies)` pairs.
  ///
  /// Dependencies on names that are not themselves entries are dropped.
  pub fn from_dependencies<'a, I>(entries: I) -> Self
  where
    I: IntoIterator<Item = (&'a str, &'a [&'a str])>,
  {
    let entries: Vec<(&str, &[&str])> = entries.into_iter().collect();
    let mut graph = DiGraph::new();
    let mut name_to_node = HashMap::new();

    for (name, _) in &entries {
      if name_to_node.contains_key(*name) {
        continue;
      }
      let idx = graph.add_node(WorkspaceNode {
        name: name.to_string(),
        identity: None,
        dir: PathBuf::from(name),
        kind: String::new(),
        dependencies: Vec::new(),
      });
      name_to_node.insert(name.to_string(), idx);
    }

    for (name, deps) in &entries {
      let from = name_to_node[*name];
      let mut resolved = BTreeSet::new();
      for dep in deps.iter() {
        if dep == name {
          continue;
        }
        if let Some(&to) = name_to_node.get(*dep) {
          graph.update_edge(from, to, ());
          resolved.insert(dep.to_string());
        }
      }
      graph[from].dependencies.extend(resolved);
      graph[from].dependencies.sort();
      graph[from].dependencies.dedup();
    }

    Self { graph, name_to_node }
  }

  pub fn len(&self) -> usize {
    self.graph.node_count()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.node_count() == 0
  }

  pub fn contains(&self, name: &str) -> bool {
    self.name_to_node.contains_key(name)
  }

  pub fn node(&self, name: &str) -> Option<&WorkspaceNode> {
    self.name_to_node.get(name).map(|idx| &self.graph[*idx])
  }

  /// All workspace names, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.name_to_node.keys().cloned().collect();
    names.sort();
    names
  }

  /// Direct dependencies of a workspace (what it uses).
  pub fn dependencies_of(&self, name: &str) -> RailResult<Vec<String>> {
    self.neighbors(name, Direction::Outgoing)
  }

  /// Direct dependents of a workspace (what uses it).
  pub fn dependents_of(&self, name: &str) -> RailResult<Vec<String>> {
    self.neighbors(name, Direction::Incoming)
  }

  /// Every edge as `(dependent, dependency)`.
  pub fn edges(&self) -> Vec<(String, String)> {
    self
      .graph
      .edge_indices()
      .filter_map(|e| self.graph.edge_endpoints(e))
      .map(|(a, b)| (self.graph[a].name.clone(), self.graph[b].name.clone()))
      .collect()
  }

  /// Strongly connected components with more than one member.
  pub fn find_cycles(&self) -> Vec<Vec<String>> {
    algo::tarjan_scc(&self.graph)
      .into_iter()
      .filter(|component| component.len() > 1)
      .map(|component| {
        let mut names: Vec<String> = component.into_iter().map(|idx| self.graph[idx].name.clone()).collect();
        names.sort();
        names
      })
      .collect()
  }

  /// Export graph to DOT format (Graphviz).
  ///
  /// # Example
  /// ```bash
  /// eco-rail graph --dot > graph.dot
  /// dot -Tpng graph.dot -o graph.png
  /// ```
  pub fn to_dot(&self) -> String {
    use petgraph::dot::{Config, Dot};

    let dot = Dot::with_attr_getters(
      &self.graph,
      &[Config::EdgeNoLabel, Config::NodeNoLabel],
      &|_, _| String::new(),
      &|_, (_idx, node)| format!("label=\"{}\\n({})\" shape=box", node.name, node.kind),
    );

    format!("{:?}", dot)
  }

  fn neighbors(&self, name: &str, direction: Direction) -> RailResult<Vec<String>> {
    let idx = self.find_node(name)?;
    let mut names: Vec<String> = self
      .graph
      .neighbors_directed(idx, direction)
      .map(|n| self.graph[n].name.clone())
      .collect();
    names.sort();
    names.dedup();
    Ok(names)
  }

  fn find_node(&self, name: &str) -> RailResult<NodeIndex> {
    self.name_to_node.get(name).copied().ok_or_else(|| {
      RailError::message(format!(
        "Workspace '{}' not found. Available workspaces: {}",
        name,
        self.names().join(", ")
      ))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn ws(name: &str, kind: &str) -> WorkspaceConfig {
    WorkspaceConfig {
      name: name.to_string(),
      path: PathBuf::from(name),
      kind: kind.to_string(),
      changelog: None,
      remote: None,
    }
  }

  fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
  }

  #[test]
  fn test_build_resolves_identities() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "core/go.mod", "module github.com/acme/core\n\ngo 1.22\n");
    write(root, "core/core.go", "package core\n");
    write(
      root,
      "proxy/go.mod",
      "module github.com/acme/proxy\n\nrequire (\n\tgithub.com/acme/core v0.1.0\n\tgithub.com/acme/core v0.1.0\n)\n",
    );
    write(
      root,
      "proxy/proxy.go",
      "package proxy\n\nimport \"github.com/acme/core\"\n",
    );

    let registry = HandlerRegistry::with_defaults();
    let graph = EcosystemGraph::build(root, &[ws("core", "go"), ws("proxy", "go")], &registry).unwrap();

    assert_eq!(graph.names(), vec!["core", "proxy"]);
    assert_eq!(graph.dependencies_of("proxy").unwrap(), vec!["core"]);
    assert_eq!(graph.dependents_of("core").unwrap(), vec!["proxy"]);
    // duplicate require collapses to one edge
    assert_eq!(graph.edges().len(), 1);
    assert_eq!(
      graph.node("core").unwrap().identity.as_deref(),
      Some("github.com/acme/core")
    );
  }

  #[test]
  fn test_missing_manifest_is_skipped() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "core/go.mod", "module github.com/acme/core\n");
    fs::create_dir_all(tmp.path().join("ghost")).unwrap();

    let registry = HandlerRegistry::with_defaults();
    let graph = EcosystemGraph::build(tmp.path(), &[ws("core", "go"), ws("ghost", "go")], &registry).unwrap();
    assert_eq!(graph.names(), vec!["core"]);
  }

  #[test]
  fn test_unknown_type_fails() {
    let tmp = TempDir::new().unwrap();
    let registry = HandlerRegistry::with_defaults();
    let err = EcosystemGraph::build(tmp.path(), &[ws("core", "zig")], &registry)
      .err()
      .unwrap();
    assert!(matches!(err, RailError::HandlerNotFound { .. }));
  }

  #[test]
  fn test_find_cycles() {
    let graph = EcosystemGraph::from_dependencies([
      ("core", &[][..]),
      ("context", &["core"][..]),
      ("proxy", &["core"][..]),
      ("flow", &["context"][..]),
    ]);
    assert!(graph.find_cycles().is_empty());

    let cyclic = EcosystemGraph::from_dependencies([("a", &["b"][..]), ("b", &["a"][..])]);
    assert_eq!(cyclic.find_cycles(), vec![vec!["a".to_string(), "b".to_string()]]);
  }

  #[test]
  fn test_self_dependency_is_ignored() {
    let graph = EcosystemGraph::from_dependencies([("core", &["core"][..])]);
    assert!(graph.edges().is_empty());
    assert!(graph.node("core").unwrap().dependencies.is_empty());
  }

  #[test]
  fn test_dot_mentions_every_node() {
    let graph = EcosystemGraph::from_dependencies([("core", &[][..]), ("proxy", &["core"][..])]);
    let dot = graph.to_dot();
    assert!(dot.contains("digraph"));
    assert!(dot.contains("core"));
    assert!(dot.contains("proxy"));
  }
}
