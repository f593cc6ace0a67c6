//! npm package handler
//!
//! package.json is edited as an ordered JSON value so unknown fields and key
//! order survive. The lock step runs whichever package manager owns the
//! lockfile.

use super::{Dependency, DependencyKind, ProjectHandler, WorkspaceIndex, run_tool, to_args};
use crate::core::error::{RailError, RailResult, ResultExt};
use semver::Version;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Sections that ship with the package; devDependencies are test/build-only
const DEP_SECTIONS: &[&str] = &["dependencies", "peerDependencies", "optionalDependencies"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageManager {
  Npm,
  Pnpm,
  Yarn,
  Bun,
}

impl PackageManager {
  fn detect(dir: &Path) -> Self {
    if dir.join("bun.lockb").exists() || dir.join("bun.lock").exists() {
      return Self::Bun;
    }
    if dir.join("pnpm-lock.yaml").exists() {
      return Self::Pnpm;
    }
    if dir.join("yarn.lock").exists() {
      return Self::Yarn;
    }
    Self::Npm
  }

  /// Refresh the lockfile without running install scripts
  fn lock(self, dir: &Path) -> RailResult<()> {
    match self {
      Self::Npm => run_tool(dir, "npm", &["install", "--package-lock-only", "--ignore-scripts"]),
      Self::Pnpm => run_tool(dir, "pnpm", &["install", "--lockfile-only", "--ignore-scripts"]),
      Self::Yarn => run_tool(dir, "yarn", &["install", "--ignore-scripts"]),
      Self::Bun => run_tool(dir, "bun", &["install", "--ignore-scripts"]),
    }
  }
}

pub struct NodeHandler;

impl NodeHandler {
  pub fn new() -> Self {
    Self
  }
}

impl Default for NodeHandler {
  fn default() -> Self {
    Self::new()
  }
}

fn load_package(dir: &Path) -> RailResult<(PathBuf, Map<String, Value>)> {
  let path = dir.join("package.json");
  let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
  match serde_json::from_str::<Value>(&content)? {
    Value::Object(map) => Ok((path, map)),
    _ => Err(RailError::message(format!("{} is not a JSON object", path.display()))),
  }
}

fn save_package(path: &Path, package: Map<String, Value>) -> RailResult<()> {
  let mut rendered = serde_json::to_string_pretty(&Value::Object(package))?;
  rendered.push('\n');
  fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))
}

/// Requirement for `version` that keeps the range style of `previous`
fn requirement_like(previous: Option<&str>, version: &Version) -> String {
  match previous {
    Some(prev) if prev.starts_with('~') => format!("~{}", version),
    Some(prev) if Version::parse(prev).is_ok() => version.to_string(),
    _ => format!("^{}", version),
  }
}

/// Drop `name` from npm `overrides`, yarn `resolutions` and `pnpm.overrides`
fn drop_overrides(package: &mut Map<String, Value>, name: &str) {
  for key in ["overrides", "resolutions"] {
    if let Some(Value::Object(overrides)) = package.get_mut(key) {
      overrides.shift_remove(name);
    }
  }
  if let Some(Value::Object(pnpm)) = package.get_mut("pnpm")
    && let Some(Value::Object(overrides)) = pnpm.get_mut("overrides")
  {
    overrides.shift_remove(name);
  }
}

impl ProjectHandler for NodeHandler {
  fn kind(&self) -> &'static str {
    "node"
  }

  fn manifest_filename(&self) -> &'static str {
    "package.json"
  }

  fn identity(&self, dir: &Path) -> RailResult<Option<String>> {
    let (_, package) = load_package(dir)?;
    Ok(package.get("name").and_then(Value::as_str).map(str::to_string))
  }

  fn parse_dependencies(&self, dir: &Path, index: &WorkspaceIndex) -> RailResult<Vec<Dependency>> {
    let (_, package) = load_package(dir)?;

    let mut deps = Vec::new();
    for section in DEP_SECTIONS {
      let Some(Value::Object(entries)) = package.get(*section) else {
        continue;
      };
      for (name, spec) in entries {
        deps.push(Dependency {
          name: name.clone(),
          version: spec.as_str().unwrap_or("*").to_string(),
          kind: DependencyKind::Library,
          is_workspace_local: index.contains(name),
        });
      }
    }
    Ok(deps)
  }

  fn update_dependency(&self, dir: &Path, name: &str, version: &Version) -> RailResult<()> {
    let (path, mut package) = load_package(dir)?;
    drop_overrides(&mut package, name);

    let mut found = false;
    for section in DEP_SECTIONS {
      if let Some(Value::Object(entries)) = package.get_mut(*section)
        && let Some(spec) = entries.get_mut(name)
      {
        *spec = Value::String(requirement_like(spec.as_str(), version));
        found = true;
      }
    }
    if !found {
      return Err(RailError::message(format!(
        "{} does not depend on '{}'",
        path.display(),
        name
      )));
    }

    save_package(&path, package)?;
    PackageManager::detect(dir)
      .lock(dir)
      .context("Lockfile refresh failed after dependency update")
  }

  fn get_version(&self, dir: &Path) -> RailResult<Option<Version>> {
    let (_, package) = load_package(dir)?;
    match package.get("version").and_then(Value::as_str) {
      Some(raw) => Ok(Some(Version::parse(raw)?)),
      None => Ok(None),
    }
  }

  fn set_version(&self, dir: &Path, version: &Version) -> RailResult<Vec<PathBuf>> {
    let (path, mut package) = load_package(dir)?;
    let next = version.to_string();
    if package.get("version").and_then(Value::as_str) == Some(next.as_str()) {
      return Ok(Vec::new());
    }
    package.insert("version".to_string(), Value::String(next));
    save_package(&path, package)?;
    Ok(vec![path])
  }

  fn mutable_files(&self) -> Vec<&'static str> {
    vec![
      "package.json",
      "package-lock.json",
      "pnpm-lock.yaml",
      "yarn.lock",
      "bun.lock",
    ]
  }

  fn build_command(&self) -> Vec<String> {
    to_args(&["npm", "run", "build", "--if-present"])
  }

  fn test_command(&self) -> Vec<String> {
    to_args(&["npm", "test"])
  }

  fn verify_command(&self) -> Vec<String> {
    to_args(&["npm", "run", "lint", "--if-present"])
  }

  fn skeleton(&self, name: &str, identity: &str) -> Vec<(PathBuf, String)> {
    let manifest = serde_json::json!({
      "name": identity,
      "version": "0.1.0",
      "private": false,
      "main": "index.js",
      "scripts": { "test": "node --test" },
      "dependencies": {}
    });
    let rendered = serde_json::to_string_pretty(&manifest).unwrap_or_default() + "\n";
    vec![
      (PathBuf::from("package.json"), rendered),
      (PathBuf::from("index.js"), "module.exports = {};\n".to_string()),
      (PathBuf::from("README.md"), format!("# {}\n", name)),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const PACKAGE: &str = r#"{
  "name": "@acme/proxy",
  "version": "0.2.0",
  "zebra": true,
  "dependencies": {
    "@acme/core": "^0.3.0",
    "left-pad": "1.3.0"
  },
  "devDependencies": {
    "@acme/testkit": "^1.0.0"
  },
  "peerDependencies": {
    "@acme/context": "~0.1.0"
  },
  "overrides": {
    "@acme/core": "file:../core"
  }
}
"#;

  fn write_package() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("package.json"), PACKAGE).unwrap();
    dir
  }

  fn index() -> WorkspaceIndex {
    let mut index = WorkspaceIndex::new();
    for name in ["@acme/core", "@acme/context", "@acme/testkit"] {
      index.insert(name);
    }
    index
  }

  #[test]
  fn test_dev_dependencies_are_not_local() {
    let dir = write_package();
    let deps = NodeHandler::new().parse_dependencies(dir.path(), &index()).unwrap();
    let local: Vec<&str> = deps
      .iter()
      .filter(|d| d.is_workspace_local)
      .map(|d| d.name.as_str())
      .collect();
    assert_eq!(local, vec!["@acme/core", "@acme/context"]);
  }

  #[test]
  fn test_set_version_keeps_key_order() {
    let dir = write_package();
    let handler = NodeHandler::new();
    handler.set_version(dir.path(), &Version::new(0, 3, 0)).unwrap();

    let content = fs::read_to_string(dir.path().join("package.json")).unwrap();
    let name = content.find("\"name\"").unwrap();
    let zebra = content.find("\"zebra\"").unwrap();
    let deps = content.find("\"dependencies\"").unwrap();
    assert!(name < zebra && zebra < deps);
    assert_eq!(handler.get_version(dir.path()).unwrap(), Some(Version::new(0, 3, 0)));
  }

  #[test]
  fn test_requirement_keeps_range_style() {
    let v = Version::new(1, 2, 3);
    assert_eq!(requirement_like(Some("~0.1.0"), &v), "~1.2.3");
    assert_eq!(requirement_like(Some("0.1.0"), &v), "1.2.3");
    assert_eq!(requirement_like(Some("^0.1.0"), &v), "^1.2.3");
    assert_eq!(requirement_like(Some("workspace:*"), &v), "^1.2.3");
    assert_eq!(requirement_like(None, &v), "^1.2.3");
  }

  #[test]
  fn test_drop_overrides() {
    let (_, mut package) = {
      let dir = write_package();
      load_package(dir.path()).unwrap()
    };
    drop_overrides(&mut package, "@acme/core");
    let overrides = package.get("overrides").and_then(Value::as_object).unwrap();
    assert!(overrides.is_empty());
  }

  #[test]
  fn test_package_manager_detection() {
    let dir = TempDir::new().unwrap();
    assert_eq!(PackageManager::detect(dir.path()), PackageManager::Npm);
    fs::write(dir.path().join("pnpm-lock.yaml"), "").unwrap();
    assert_eq!(PackageManager::detect(dir.path()), PackageManager::Pnpm);
  }
}
