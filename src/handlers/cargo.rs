//! Cargo package handler
//!
//! Manifests are edited with toml_edit so comments and layout survive version
//! bumps. Only normal and build dependencies are considered for the graph;
//! dev-dependencies are test-only. Build dependencies count as binary use.

use super::{Dependency, DependencyKind, ProjectHandler, WorkspaceIndex, run_tool, to_args};
use crate::core::error::{RailError, RailResult, ResultExt};
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, Table, Value};

const DEP_SECTIONS: &[&str] = &["dependencies", "build-dependencies"];

pub struct CargoHandler;

impl CargoHandler {
  pub fn new() -> Self {
    Self
  }
}

impl Default for CargoHandler {
  fn default() -> Self {
    Self::new()
  }
}

fn load_manifest(dir: &Path) -> RailResult<(PathBuf, DocumentMut)> {
  let path = dir.join("Cargo.toml");
  let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
  let doc = content
    .parse::<DocumentMut>()
    .with_context(|| format!("Failed to parse {}", path.display()))?;
  Ok((path, doc))
}

/// Every dependency table, including `[target.'cfg(..)'.dependencies]`
fn dependency_tables(doc: &DocumentMut) -> Vec<(&'static str, &Table)> {
  let mut tables: Vec<(&'static str, &Table)> = DEP_SECTIONS
    .iter()
    .filter_map(|section| Some((*section, doc.get(section).and_then(Item::as_table)?)))
    .collect();

  if let Some(targets) = doc.get("target").and_then(Item::as_table) {
    for (_, target) in targets.iter() {
      for section in DEP_SECTIONS {
        if let Some(table) = target.get(section).and_then(Item::as_table) {
          tables.push((*section, table));
        }
      }
    }
  }
  tables
}

fn dependency_tables_mut(doc: &mut DocumentMut) -> Vec<&mut Table> {
  let mut tables = Vec::new();
  for (key, item) in doc.iter_mut() {
    let key = key.get().to_string();
    if DEP_SECTIONS.contains(&key.as_str()) {
      if let Some(table) = item.as_table_mut() {
        tables.push(table);
      }
    } else if key == "target"
      && let Some(targets) = item.as_table_mut()
    {
      for (_, target) in targets.iter_mut() {
        if let Some(target) = target.as_table_mut() {
          for (section, deps) in target.iter_mut() {
            if DEP_SECTIONS.contains(&section.get())
              && let Some(deps) = deps.as_table_mut()
            {
              tables.push(deps);
            }
          }
        }
      }
    }
  }
  tables
}

/// New string value that keeps the surrounding whitespace and comments of `old`
fn string_like(old: Option<&Value>, new: &str) -> Value {
  let mut value = Value::from(new);
  if let Some(old) = old {
    *value.decor_mut() = old.decor().clone();
  }
  value
}

/// Package name behind a dependency key (honours `package = "..."` renames)
fn package_name(key: &str, item: &Item) -> String {
  item
    .get("package")
    .and_then(Item::as_str)
    .unwrap_or(key)
    .to_string()
}

fn declared_version(item: &Item) -> String {
  item
    .as_str()
    .or_else(|| item.get("version").and_then(Item::as_str))
    .unwrap_or("*")
    .to_string()
}

fn is_artifact(item: &Item) -> bool {
  item.get("artifact").is_some()
}

/// Replace the version requirement of a dependency item, dropping path/git pins
fn set_requirement(item: &mut Item, requirement: &str) {
  if item.is_str() {
    *item = Item::Value(string_like(item.as_value(), requirement));
    return;
  }

  if let Some(table) = item.as_inline_table_mut() {
    for key in ["path", "git", "branch", "rev", "tag"] {
      table.remove(key);
    }
    table.insert("version", Value::from(requirement));
    table.fmt();
    return;
  }

  if let Some(table) = item.as_table_mut() {
    for key in ["path", "git", "branch", "rev", "tag"] {
      table.remove(key);
    }
    let value = string_like(table.get("version").and_then(Item::as_value), requirement);
    table.insert("version", Item::Value(value));
  }
}

/// Remove `[patch.<source>].<name>` overrides; drops source tables left empty
fn drop_patches(doc: &mut DocumentMut, name: &str) -> bool {
  let Some(patch) = doc.get_mut("patch").and_then(Item::as_table_mut) else {
    return false;
  };

  let mut removed = false;
  for (_, source) in patch.iter_mut() {
    if let Some(source) = source.as_table_like_mut() {
      removed |= source.remove(name).is_some();
    }
  }
  patch.retain(|_, source| source.as_table_like().is_some_and(|t| !t.is_empty()));
  if patch.is_empty() {
    doc.remove("patch");
  }
  removed
}

impl ProjectHandler for CargoHandler {
  fn kind(&self) -> &'static str {
    "cargo"
  }

  fn manifest_filename(&self) -> &'static str {
    "Cargo.toml"
  }

  fn identity(&self, dir: &Path) -> RailResult<Option<String>> {
    let (_, doc) = load_manifest(dir)?;
    Ok(
      doc
        .get("package")
        .and_then(|p| p.get("name"))
        .and_then(Item::as_str)
        .map(str::to_string),
    )
  }

  fn parse_dependencies(&self, dir: &Path, index: &WorkspaceIndex) -> RailResult<Vec<Dependency>> {
    let (_, doc) = load_manifest(dir)?;

    let mut deps = Vec::new();
    for (section, table) in dependency_tables(&doc) {
      for (key, item) in table.iter() {
        let name = package_name(key, item);
        deps.push(Dependency {
          is_workspace_local: index.contains(&name),
          version: declared_version(item),
          kind: if section == "build-dependencies" || is_artifact(item) {
            DependencyKind::Binary
          } else {
            DependencyKind::Library
          },
          name,
        });
      }
    }
    Ok(deps)
  }

  fn update_dependency(&self, dir: &Path, name: &str, version: &Version) -> RailResult<()> {
    let (path, mut doc) = load_manifest(dir)?;
    let requirement = version.to_string();

    drop_patches(&mut doc, name);

    let mut found = false;
    for table in dependency_tables_mut(&mut doc) {
      let keys: Vec<String> = table
        .iter()
        .filter(|(key, item)| package_name(key, item) == name)
        .map(|(key, _)| key.to_string())
        .collect();
      for key in keys {
        if let Some(item) = table.get_mut(&key) {
          set_requirement(item, &requirement);
          found = true;
        }
      }
    }

    if !found {
      return Err(RailError::message(format!(
        "{} does not depend on '{}'",
        path.display(),
        name
      )));
    }

    fs::write(&path, doc.to_string()).with_context(|| format!("Failed to write {}", path.display()))?;
    run_tool(dir, "cargo", &["update", "-p", name]).context("cargo update failed after dependency update")
  }

  fn get_version(&self, dir: &Path) -> RailResult<Option<Version>> {
    let (_, doc) = load_manifest(dir)?;
    match doc
      .get("package")
      .and_then(|p| p.get("version"))
      .and_then(Item::as_str)
    {
      Some(raw) => Ok(Some(Version::parse(raw)?)),
      // absent or `version.workspace = true`
      None => Ok(None),
    }
  }

  fn set_version(&self, dir: &Path, version: &Version) -> RailResult<Vec<PathBuf>> {
    let (path, mut doc) = load_manifest(dir)?;

    let Some(package) = doc.get_mut("package").and_then(Item::as_table_mut) else {
      return Err(RailError::message(format!("No [package] section in {}", path.display())));
    };

    let next = version.to_string();
    if package.get("version").and_then(Item::as_str) == Some(next.as_str()) {
      return Ok(Vec::new());
    }
    let value = string_like(package.get("version").and_then(Item::as_value), &next);
    package["version"] = Item::Value(value);

    fs::write(&path, doc.to_string()).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(vec![path])
  }

  fn mutable_files(&self) -> Vec<&'static str> {
    vec!["Cargo.toml", "Cargo.lock"]
  }

  fn build_command(&self) -> Vec<String> {
    to_args(&["cargo", "build", "--all-targets"])
  }

  fn test_command(&self) -> Vec<String> {
    to_args(&["cargo", "test"])
  }

  fn verify_command(&self) -> Vec<String> {
    to_args(&["cargo", "check", "--all-targets"])
  }

  fn skeleton(&self, name: &str, identity: &str) -> Vec<(PathBuf, String)> {
    vec![
      (
        PathBuf::from("Cargo.toml"),
        format!(
          "[package]\nname = \"{}\"\nversion = \"0.1.0\"\nedition = \"2024\"\n\n[dependencies]\n",
          identity
        ),
      ),
      (PathBuf::from("src/lib.rs"), String::new()),
      (PathBuf::from("README.md"), format!("# {}\n", name)),
    ]
  }
}
