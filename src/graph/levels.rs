//! Level-batched topological sort (Kahn's algorithm).
//!
//! Level 0 holds workspaces with no dependencies inside the considered set;
//! level K holds those whose dependencies all sit in levels below K. Members
//! of one level can be built and released in parallel.

use super::EcosystemGraph;
use crate::core::error::{RailError, RailResult};
use std::collections::{BTreeSet, HashMap};

/// Partition `graph` (or the `subset` of it) into dependency levels.
///
/// In-degrees only count edges whose both ends are in the subset, so a
/// partial release is ordered against itself. Names within a level are
/// sorted. A cycle fails with [`RailError::Cycle`] naming every workspace
/// that could not be placed.
pub fn topological_levels(graph: &EcosystemGraph, subset: Option<&[String]>) -> RailResult<Vec<Vec<String>>> {
  let members: BTreeSet<String> = match subset {
    Some(names) => {
      let unknown: Vec<&str> = names
        .iter()
        .filter(|n| !graph.contains(n))
        .map(String::as_str)
        .collect();
      if !unknown.is_empty() {
        return Err(RailError::message(format!(
          "Unknown workspace(s): {}. Available workspaces: {}",
          unknown.join(", "),
          graph.names().join(", ")
        )));
      }
      names.iter().cloned().collect()
    }
    None => graph.names().into_iter().collect(),
  };

  if members.is_empty() {
    return Ok(Vec::new());
  }

  let mut in_degree: HashMap<&str, usize> = HashMap::new();
  let mut dependents: HashMap<&str, Vec<String>> = HashMap::new();
  for name in &members {
    let deps = graph.dependencies_of(name)?;
    in_degree.insert(name, deps.iter().filter(|d| members.contains(*d)).count());
    let users = graph
      .dependents_of(name)?
      .into_iter()
      .filter(|d| members.contains(d))
      .collect();
    dependents.insert(name, users);
  }

  let mut levels = Vec::new();
  let mut processed = 0;
  let mut current: Vec<String> = members
    .iter()
    .filter(|name| in_degree.get(name.as_str()) == Some(&0))
    .cloned()
    .collect();

  while !current.is_empty() {
    current.sort();
    processed += current.len();

    let mut next = Vec::new();
    for name in &current {
      for user in dependents.get(name.as_str()).map(Vec::as_slice).unwrap_or_default() {
        if let Some(degree) = in_degree.get_mut(user.as_str()) {
          *degree -= 1;
          if *degree == 0 {
            next.push(user.clone());
          }
        }
      }
    }

    levels.push(current);
    current = next;
  }

  if processed < members.len() {
    let modules = members
      .iter()
      .filter(|name| in_degree.get(name.as_str()).is_some_and(|d| *d > 0))
      .cloned()
      .collect();
    return Err(RailError::Cycle { modules });
  }

  Ok(levels)
}
