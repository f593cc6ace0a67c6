//! `eco-rail graph`: show the dependency graph and release levels

use crate::core::context::EcosystemContext;
use crate::core::error::{RailError, RailResult};
use crate::graph::topological_levels;
use serde_json::json;

pub fn run_graph(ctx: &EcosystemContext, dot: bool, json: bool) -> RailResult<()> {
  let graph = &ctx.graph;

  if dot {
    print!("{}", graph.to_dot());
    return Ok(());
  }

  let levels = match topological_levels(graph, None) {
    Ok(levels) => levels,
    Err(err @ RailError::Cycle { .. }) => {
      if !json {
        for cycle in graph.find_cycles() {
          eprintln!("🔁 cycle: {}", cycle.join(" -> "));
        }
      }
      return Err(err);
    }
    Err(err) => return Err(err),
  };

  if json {
    let edges: Vec<_> = graph
      .edges()
      .into_iter()
      .map(|(dependent, dependency)| json!({ "from": dependent, "to": dependency }))
      .collect();
    let output = json!({ "workspaces": graph.names(), "edges": edges, "levels": levels });
    println!("{}", serde_json::to_string_pretty(&output)?);
    return Ok(());
  }

  println!("📊 Ecosystem: {} workspace(s)", graph.len());
  println!();
  for (index, level) in levels.iter().enumerate() {
    println!("  Level {}: {}", index, level.join(", "));
  }
  println!();

  for name in graph.names() {
    let deps = graph.dependencies_of(&name)?;
    if !deps.is_empty() {
      println!("  {} -> {}", name, deps.join(", "));
    }
  }

  Ok(())
}
