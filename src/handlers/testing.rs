//! Toolchain-free handler for unit tests
//!
//! A "script" workspace has a `build.sh` (run for build, test and verify), an
//! optional `deps` file with one sibling name per line, and an optional
//! `VERSION` file. Dependency updates are appended to `deps.lock`.

use super::{Dependency, DependencyKind, ProjectHandler, WorkspaceIndex};
use crate::core::error::RailResult;
use semver::Version;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub(crate) struct ScriptHandler;

impl ProjectHandler for ScriptHandler {
  fn kind(&self) -> &'static str {
    "script"
  }

  fn manifest_filename(&self) -> &'static str {
    "build.sh"
  }

  fn identity(&self, _dir: &Path) -> RailResult<Option<String>> {
    Ok(None)
  }

  fn parse_dependencies(&self, dir: &Path, index: &WorkspaceIndex) -> RailResult<Vec<Dependency>> {
    let deps = fs::read_to_string(dir.join("deps")).unwrap_or_default();
    Ok(
      deps
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|name| Dependency {
          name: name.trim().to_string(),
          version: "0.0.0".to_string(),
          kind: DependencyKind::Library,
          is_workspace_local: index.contains(name.trim()),
        })
        .collect(),
    )
  }

  fn update_dependency(&self, dir: &Path, name: &str, version: &Version) -> RailResult<()> {
    let mut lock = fs::OpenOptions::new().create(true).append(true).open(dir.join("deps.lock"))?;
    writeln!(lock, "{}={}", name, version)?;
    Ok(())
  }

  fn get_version(&self, dir: &Path) -> RailResult<Option<Version>> {
    match fs::read_to_string(dir.join("VERSION")) {
      Ok(text) => Ok(Some(Version::parse(text.trim())?)),
      Err(_) => Ok(None),
    }
  }

  fn set_version(&self, dir: &Path, version: &Version) -> RailResult<Vec<PathBuf>> {
    let path = dir.join("VERSION");
    fs::write(&path, format!("{}\n", version))?;
    Ok(vec![path])
  }

  fn mutable_files(&self) -> Vec<&'static str> {
    vec!["VERSION", "deps.lock"]
  }

  fn build_command(&self) -> Vec<String> {
    vec!["sh".to_string(), "build.sh".to_string()]
  }

  fn test_command(&self) -> Vec<String> {
    self.build_command()
  }

  fn verify_command(&self) -> Vec<String> {
    self.build_command()
  }

  /// Names containing "broken" get a build script that fails
  fn skeleton(&self, name: &str, _identity: &str) -> Vec<(PathBuf, String)> {
    let script = if name.contains("broken") {
      "echo broken >&2\nexit 1\n".to_string()
    } else {
      format!("echo building {}\n", name)
    };
    vec![(PathBuf::from("build.sh"), script)]
  }
}

/// Write a script workspace under `root/name`
pub(crate) fn write_workspace(root: &Path, name: &str, deps: &[&str], build: &str) {
  let dir = root.join(name);
  fs::create_dir_all(&dir).unwrap();
  fs::write(dir.join("build.sh"), build).unwrap();
  fs::write(dir.join("deps"), deps.join("\n")).unwrap();
}

pub(crate) fn workspace_config(name: &str) -> crate::core::config::WorkspaceConfig {
  crate::core::config::WorkspaceConfig {
    name: name.to_string(),
    path: PathBuf::from(name),
    kind: "script".to_string(),
    changelog: None,
    remote: None,
  }
}

pub(crate) fn registry() -> super::HandlerRegistry {
  let mut registry = super::HandlerRegistry::new();
  registry.register(Box::new(ScriptHandler));
  registry
}
