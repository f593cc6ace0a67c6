use crate::core::error::{ConfigError, RailError, RailResult, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for eco-rail
/// Searched in order: rail.toml, .rail.toml, .config/rail.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RailConfig {
  #[serde(default)]
  pub ecosystem: EcosystemSettings,
  #[serde(default)]
  pub build: BuildSettings,
  #[serde(default)]
  pub ci: CiSettings,
  #[serde(default)]
  pub scaffold: ScaffoldSettings,
  #[serde(default)]
  pub workspaces: Vec<WorkspaceConfig>,
}

/// Ecosystem-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcosystemSettings {
  /// Hosting owner/org used when publishing new repositories
  #[serde(default)]
  pub owner: Option<String>,

  /// Prefix of release tags (default: "v")
  #[serde(default = "default_tag_prefix")]
  pub tag_prefix: String,
}

fn default_tag_prefix() -> String {
  "v".to_string()
}

impl Default for EcosystemSettings {
  fn default() -> Self {
    Self {
      owner: None,
      tag_prefix: default_tag_prefix(),
    }
  }
}

/// Build runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
  /// Worker count (default: available parallelism)
  #[serde(default)]
  pub workers: Option<usize>,

  /// Keep running remaining jobs after a failure
  #[serde(default)]
  pub continue_on_error: bool,

  /// Directories (relative to each workspace) holding freshly built tools.
  /// Existing ones are prepended to PATH for jobs in later levels.
  #[serde(default = "default_bin_dirs")]
  pub bin_dirs: Vec<String>,
}

fn default_bin_dirs() -> Vec<String> {
  vec!["bin".to_string()]
}

impl Default for BuildSettings {
  fn default() -> Self {
    Self {
      workers: None,
      continue_on_error: false,
      bin_dirs: default_bin_dirs(),
    }
  }
}

/// CI supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiSettings {
  /// Wait for CI after pushing release tags
  #[serde(default = "default_true")]
  pub enabled: bool,

  /// Name of the workflow a release tag triggers
  #[serde(default = "default_release_workflow")]
  pub release_workflow: String,

  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,

  /// How long to look for the release run before giving up
  #[serde(default = "default_discovery_timeout")]
  pub discovery_timeout_secs: u64,

  /// Upper bound for watching a run to completion
  #[serde(default = "default_overall_timeout")]
  pub overall_timeout_secs: u64,

  /// How many recent runs to list per poll
  #[serde(default = "default_run_limit")]
  pub run_limit: usize,
}

fn default_true() -> bool {
  true
}

fn default_release_workflow() -> String {
  "release".to_string()
}

fn default_poll_interval() -> u64 {
  10
}

fn default_discovery_timeout() -> u64 {
  300
}

fn default_overall_timeout() -> u64 {
  3600
}

fn default_run_limit() -> usize {
  20
}

impl Default for CiSettings {
  fn default() -> Self {
    Self {
      enabled: true,
      release_workflow: default_release_workflow(),
      poll_interval_secs: default_poll_interval(),
      discovery_timeout_secs: default_discovery_timeout(),
      overall_timeout_secs: default_overall_timeout(),
      run_limit: default_run_limit(),
    }
  }
}

impl CiSettings {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs)
  }

  pub fn discovery_timeout(&self) -> Duration {
    Duration::from_secs(self.discovery_timeout_secs)
  }

  pub fn overall_timeout(&self) -> Duration {
    Duration::from_secs(self.overall_timeout_secs)
  }
}

/// Settings for creating new repositories
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScaffoldSettings {
  /// Extra shared files (relative to the root) a creation run may touch.
  /// rail.toml itself is always snapshotted.
  #[serde(default)]
  pub shared_files: Vec<PathBuf>,

  /// Command run in the root to register a new repository with the ecosystem
  #[serde(default)]
  pub register_command: Vec<String>,

  /// Publish new repositories as public instead of private
  #[serde(default)]
  pub public: bool,
}

/// One repository in the ecosystem
///
/// # Example
///
/// ```toml
/// [[workspaces]]
/// name = "core"
/// path = "core"
/// type = "go"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceConfig {
  /// Unique workspace name (graph key)
  pub name: String,

  /// Directory relative to the ecosystem root
  pub path: PathBuf,

  /// Declared project type, resolved through the handler registry
  #[serde(rename = "type")]
  pub kind: String,

  /// Changelog file relative to the workspace (default: CHANGELOG.md)
  #[serde(default)]
  pub changelog: Option<PathBuf>,

  /// Git remote to push release tags to (default: origin)
  #[serde(default)]
  pub remote: Option<String>,
}

impl WorkspaceConfig {
  pub fn dir(&self, root: &Path) -> PathBuf {
    root.join(&self.path)
  }

  pub fn changelog_path(&self, root: &Path) -> PathBuf {
    self
      .dir(root)
      .join(self.changelog.as_deref().unwrap_or(Path::new("CHANGELOG.md")))
  }

  pub fn remote(&self) -> &str {
    self.remote.as_deref().unwrap_or("origin")
  }
}

impl RailConfig {
  /// Find config file in search order: rail.toml, .rail.toml, .config/rail.toml
  pub fn find_config_path(path: &Path) -> Option<PathBuf> {
    let candidates = [
      path.join("rail.toml"),
      path.join(".rail.toml"),
      path.join(".config").join("rail.toml"),
    ];

    candidates.into_iter().find(|p| p.exists())
  }

  /// Load config from rail.toml (searches multiple locations)
  pub fn load(path: &Path) -> RailResult<Self> {
    let config_path = Self::find_config_path(path).ok_or_else(|| {
      RailError::Config(ConfigError::NotFound {
        workspace_root: path.to_path_buf(),
      })
    })?;

    let content = fs::read_to_string(&config_path)
      .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
    let config = Self::parse(&content).with_context(|| format!("Invalid config in {}", config_path.display()))?;

    Ok(config)
  }

  /// Parse and validate config text
  pub fn parse(content: &str) -> RailResult<Self> {
    let config: RailConfig = toml_edit::de::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> RailResult<()> {
    let mut seen = HashSet::new();
    for ws in &self.workspaces {
      if ws.name.trim().is_empty() {
        return Err(RailError::Config(ConfigError::MissingField {
          field: "workspaces.name".to_string(),
        }));
      }
      if ws.path.as_os_str().is_empty() {
        return Err(RailError::Config(ConfigError::MissingField {
          field: format!("path for workspace '{}'", ws.name),
        }));
      }
      if !seen.insert(ws.name.as_str()) {
        return Err(RailError::Config(ConfigError::Invalid {
          field: "workspaces".to_string(),
          reason: format!("workspace '{}' is declared more than once", ws.name),
        }));
      }
    }

    if self.build.workers == Some(0) {
      return Err(RailError::Config(ConfigError::Invalid {
        field: "build.workers".to_string(),
        reason: "must be at least 1".to_string(),
      }));
    }

    if self.ci.poll_interval_secs == 0 {
      return Err(RailError::Config(ConfigError::Invalid {
        field: "ci.poll_interval_secs".to_string(),
        reason: "must be at least 1".to_string(),
      }));
    }

    if self.ci.discovery_timeout_secs >= self.ci.overall_timeout_secs {
      return Err(RailError::Config(ConfigError::Invalid {
        field: "ci.discovery_timeout_secs".to_string(),
        reason: format!(
          "must be shorter than ci.overall_timeout_secs ({})",
          self.ci.overall_timeout_secs
        ),
      }));
    }

    Ok(())
  }

  pub fn workspace(&self, name: &str) -> RailResult<&WorkspaceConfig> {
    self
      .workspaces
      .iter()
      .find(|ws| ws.name == name)
      .ok_or_else(|| RailError::Config(ConfigError::WorkspaceNotFound { name: name.to_string() }))
  }
}

/// Append a `[[workspaces]]` entry to an existing config file.
///
/// Edits through `toml_edit` so comments and layout of the rest of the file
/// survive untouched.
pub fn append_workspace(config_path: &Path, ws: &WorkspaceConfig) -> RailResult<()> {
  let content = fs::read_to_string(config_path)
    .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
  let mut doc: toml_edit::DocumentMut = content.parse()?;

  let mut table = toml_edit::Table::new();
  table["name"] = toml_edit::value(ws.name.as_str());
  table["path"] = toml_edit::value(ws.path.to_string_lossy().as_ref());
  table["type"] = toml_edit::value(ws.kind.as_str());
  if let Some(changelog) = &ws.changelog {
    table["changelog"] = toml_edit::value(changelog.to_string_lossy().as_ref());
  }
  if let Some(remote) = &ws.remote {
    table["remote"] = toml_edit::value(remote.as_str());
  }

  match doc.get_mut("workspaces") {
    Some(item) => {
      let array = item.as_array_of_tables_mut().ok_or_else(|| {
        RailError::Config(ConfigError::Invalid {
          field: "workspaces".to_string(),
          reason: "expected [[workspaces]] tables".to_string(),
        })
      })?;
      array.push(table);
    }
    None => {
      let mut array = toml_edit::ArrayOfTables::new();
      array.push(table);
      doc.insert("workspaces", toml_edit::Item::ArrayOfTables(array));
    }
  }

  fs::write(config_path, doc.to_string())
    .with_context(|| format!("Failed to write config to {}", config_path.display()))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
[ecosystem]
owner = "acme"

[ci]
release_workflow = "publish"
discovery_timeout_secs = 60

[[workspaces]]
name = "core"
path = "core"
type = "go"

[[workspaces]]
name = "flow"
path = "tools/flow"
type = "cargo"
changelog = "docs/CHANGES.md"
"#;

  #[test]
  fn test_parse_sample() {
    let config = RailConfig::parse(SAMPLE).unwrap();
    assert_eq!(config.workspaces.len(), 2);
    assert_eq!(config.ci.release_workflow, "publish");
    assert_eq!(config.ci.poll_interval_secs, 10);
    assert_eq!(config.ecosystem.tag_prefix, "v");
    assert!(!config.build.continue_on_error);

    let flow = config.workspace("flow").unwrap();
    assert_eq!(flow.kind, "cargo");
    assert_eq!(
      flow.changelog_path(Path::new("/eco")),
      PathBuf::from("/eco/tools/flow/docs/CHANGES.md")
    );
    assert_eq!(flow.remote(), "origin");
  }

  #[test]
  fn test_duplicate_workspace_rejected() {
    let content = r#"
[[workspaces]]
name = "core"
path = "a"
type = "go"

[[workspaces]]
name = "core"
path = "b"
type = "go"
"#;
    assert!(RailConfig::parse(content).is_err());
  }

  #[test]
  fn test_discovery_must_be_shorter_than_overall() {
    let content = r#"
[ci]
discovery_timeout_secs = 600
overall_timeout_secs = 600
"#;
    assert!(RailConfig::parse(content).is_err());
  }

  #[test]
  fn test_unknown_workspace() {
    let config = RailConfig::parse(SAMPLE).unwrap();
    let err = config.workspace("nope").unwrap_err();
    assert!(matches!(err, RailError::Config(ConfigError::WorkspaceNotFound { .. })));
  }

  #[test]
  fn test_append_workspace_preserves_comments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rail.toml");
    fs::write(&path, "# ecosystem\n[ecosystem]\nowner = \"acme\" # org\n").unwrap();

    let ws = WorkspaceConfig {
      name: "proxy".to_string(),
      path: PathBuf::from("proxy"),
      kind: "go".to_string(),
      changelog: None,
      remote: None,
    };
    append_workspace(&path, &ws).unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.starts_with("# ecosystem\n"));
    assert!(written.contains("owner = \"acme\" # org"));

    let config = RailConfig::parse(&written).unwrap();
    assert_eq!(config.workspaces, vec![ws]);
  }
}
