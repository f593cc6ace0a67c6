//! New repository creation with all-or-nothing semantics
//!
//! Phases run in a fixed order. Each completed side effect is recorded in
//! [`CreationState`] right after it happens, so rollback undoes exactly what
//! was done and nothing else.

use super::rollback::{FileSnapshot, RollbackReport, capture_all};
use crate::build::{BuildJob, BuildRunner, first_failure};
use crate::core::config::{RailConfig, WorkspaceConfig, append_workspace};
use crate::core::error::{ConfigError, RailError, RailResult, ResultExt, ValidationError};
use crate::core::vcs::SystemGit;
use crate::handlers::{HandlerRegistry, ProjectHandler, run_tool};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What to create
#[derive(Debug, Clone)]
pub struct CreateRequest {
  pub name: String,
  /// Handler type (`go`, `cargo`, `node`, ...)
  pub kind: String,
  /// Directory relative to the root (default: the name)
  pub path: Option<PathBuf>,
  /// Module/package identity (default derived from owner and name)
  pub identity: Option<String>,
  /// Create the hosted repository with `gh repo create`
  pub publish: bool,
  /// Run `scaffold.register_command` in the root
  pub register: bool,
}

impl CreateRequest {
  pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      kind: kind.into(),
      path: None,
      identity: None,
      publish: false,
      register: false,
    }
  }
}

/// Side effects completed so far
#[derive(Debug, Default)]
pub struct CreationState {
  /// Outermost directory the run created, which may be a parent of the
  /// repository directory
  pub created_dir: Option<PathBuf>,
  pub skeleton_written: bool,
  pub manifest_registered: bool,
  pub verified: bool,
  /// `owner/name` once the hosted repository exists
  pub remote_created: Option<String>,
  pub registered: bool,
  /// Shared files as they were before the run
  pub snapshots: Vec<FileSnapshot>,
}

pub struct RepoCreator<'a> {
  root: &'a Path,
  config_path: PathBuf,
  config: &'a RailConfig,
  registry: &'a HandlerRegistry,
  runner: BuildRunner,
}

impl<'a> RepoCreator<'a> {
  pub fn new(root: &'a Path, config_path: PathBuf, config: &'a RailConfig, registry: &'a HandlerRegistry) -> Self {
    Self {
      root,
      config_path,
      config,
      registry,
      runner: BuildRunner::new(Some(1)),
    }
  }

  pub fn with_runner(mut self, runner: BuildRunner) -> Self {
    self.runner = runner;
    self
  }

  /// Create the repository, returning its directory.
  ///
  /// On failure every recorded side effect is undone and the original error
  /// is returned; rollback problems are logged as warnings.
  pub fn create(&self, request: &CreateRequest) -> RailResult<PathBuf> {
    let handler = self.registry.get(&request.kind)?;
    let relative = request.path.clone().unwrap_or_else(|| PathBuf::from(&request.name));
    let dir = self.root.join(&relative);

    if self.config.workspaces.iter().any(|ws| ws.name == request.name) {
      return Err(RailError::Validation(ValidationError::WorkspaceInvalid {
        reason: format!("workspace '{}' already exists in the config", request.name),
      }));
    }
    if dir.exists() {
      return Err(RailError::Validation(ValidationError::AlreadyExists { path: dir }));
    }

    let mut state = CreationState {
      snapshots: capture_all(self.shared_files().iter().map(PathBuf::as_path))?,
      ..CreationState::default()
    };

    match self.run_phases(request, handler, &relative, &dir, &mut state) {
      Ok(()) => {
        info!(name = %request.name, dir = %dir.display(), "repository created");
        Ok(dir)
      }
      Err(err) => {
        let report = self.rollback(&state);
        report.log();
        Err(err)
      }
    }
  }

  fn shared_files(&self) -> Vec<PathBuf> {
    let mut files = vec![self.config_path.clone()];
    files.extend(self.config.scaffold.shared_files.iter().map(|p| self.root.join(p)));
    files
  }

  fn run_phases(
    &self,
    request: &CreateRequest,
    handler: &dyn ProjectHandler,
    relative: &Path,
    dir: &Path,
    state: &mut CreationState,
  ) -> RailResult<()> {
    // skeleton
    let outermost = outermost_missing(dir);
    fs::create_dir_all(dir)
      .with_context(|| format!("Failed to create {}", dir.display()))
      .map_err(|e| e.in_phase("skeleton"))?;
    state.created_dir = Some(outermost);
    self.write_skeleton(request, handler, dir).map_err(|e| e.in_phase("skeleton"))?;
    state.skeleton_written = true;

    // graph manifest
    let ws = WorkspaceConfig {
      name: request.name.clone(),
      path: relative.to_path_buf(),
      kind: request.kind.clone(),
      changelog: None,
      remote: None,
    };
    append_workspace(&self.config_path, &ws).map_err(|e| e.in_phase("manifest"))?;
    state.manifest_registered = true;

    // local verification
    for command in [handler.build_command(), handler.test_command()] {
      let job = BuildJob::new(request.name.clone(), dir).with_command(command);
      let results = self.runner.run(vec![job]).map_err(|e| e.in_phase("verify"))?;
      if let Some(err) = first_failure(results) {
        return Err(err.in_phase("verify"));
      }
    }
    state.verified = true;

    if request.publish {
      let remote = self.publish(&request.name, dir).map_err(|e| e.in_phase("publish"))?;
      state.remote_created = Some(remote);
    }

    if request.register {
      self.register(request, relative).map_err(|e| e.in_phase("register"))?;
      state.registered = true;
    }

    Ok(())
  }

  fn write_skeleton(&self, request: &CreateRequest, handler: &dyn ProjectHandler, dir: &Path) -> RailResult<()> {
    let identity = request.identity.clone().unwrap_or_else(|| match &self.config.ecosystem.owner {
      Some(owner) if request.kind == "go" => format!("github.com/{}/{}", owner, request.name),
      _ => request.name.clone(),
    });

    for (path, content) in handler.skeleton(&request.name, &identity) {
      let path = dir.join(path);
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
      }
      fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    SystemGit::init(dir, "main")?;
    Ok(())
  }

  fn publish(&self, name: &str, dir: &Path) -> RailResult<String> {
    let owner = self.config.ecosystem.owner.as_deref().ok_or_else(|| {
      RailError::Config(ConfigError::MissingField {
        field: "ecosystem.owner".to_string(),
      })
    })?;
    let full_name = format!("{}/{}", owner, name);
    let visibility = if self.config.scaffold.public {
      "--public"
    } else {
      "--private"
    };
    let source = format!("--source={}", dir.display());
    run_tool(
      dir,
      "gh",
      &["repo", "create", &full_name, visibility, &source, "--remote=origin"],
    )?;
    Ok(full_name)
  }

  fn register(&self, request: &CreateRequest, relative: &Path) -> RailResult<()> {
    let command = &self.config.scaffold.register_command;
    let Some((program, args)) = command.split_first() else {
      return Err(RailError::Config(ConfigError::MissingField {
        field: "scaffold.register_command".to_string(),
      }));
    };

    let path = relative.to_string_lossy();
    let args: Vec<String> = args
      .iter()
      .map(|arg| arg.replace("{name}", &request.name).replace("{path}", &path))
      .collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run_tool(self.root, program, &args)
  }

  fn rollback(&self, state: &CreationState) -> RollbackReport {
    let mut report = RollbackReport::new();

    report.restore_all(&state.snapshots);

    if let Some(dir) = &state.created_dir {
      let what = format!("remove {}", dir.display());
      report.attempt(
        &what,
        fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display())),
      );
    }

    match SystemGit::open(self.root) {
      Ok(git) => {
        let mut paths: Vec<PathBuf> = state
          .snapshots
          .iter()
          .filter(|s| s.path.exists())
          .map(|s| s.path.clone())
          .collect();
        paths.sort();
        if !paths.is_empty() {
          report.attempt("unstage shared files", git.reset_paths(&paths));
        }
      }
      Err(_) => debug!(root = %self.root.display(), "root is not a git repository, nothing to unstage"),
    }

    if let Some(remote) = &state.remote_created {
      report.manual(format!("delete the hosted repository: gh repo delete {} --yes", remote));
    }

    report
  }
}

/// `dir` or its outermost ancestor that does not exist yet
fn outermost_missing(dir: &Path) -> PathBuf {
  let mut top = dir;
  while let Some(parent) = top.parent()
    && !parent.as_os_str().is_empty()
    && !parent.exists()
  {
    top = parent;
  }
  top.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handlers::testing;
  use tempfile::TempDir;

  const CONFIG: &str = "# ecosystem root\n[ecosystem]\nowner = \"acme\"   # org\n\n[scaffold]\nshared_files = [\"registry.txt\"]\n";

  fn setup(register: &[&str]) -> (TempDir, RailConfig) {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("rail.toml"), CONFIG).unwrap();
    fs::write(tmp.path().join("registry.txt"), "core\n").unwrap();
    let mut config = RailConfig::parse(CONFIG).unwrap();
    config.scaffold.register_command = register.iter().map(|s| s.to_string()).collect();
    (tmp, config)
  }

  #[test]
  fn test_failed_registration_rolls_everything_back() {
    let (tmp, config) = setup(&["sh", "-c", "echo {name} >> registry.txt; exit 3"]);
    let registry = testing::registry();
    let creator = RepoCreator::new(tmp.path(), tmp.path().join("rail.toml"), &config, &registry);

    let mut request = CreateRequest::new("proxy", "script");
    request.register = true;
    let err = creator.create(&request).unwrap_err();

    assert!(matches!(err, RailError::Phase { ref phase, .. } if phase == "register"));
    assert_eq!(fs::read_to_string(tmp.path().join("rail.toml")).unwrap(), CONFIG);
    assert_eq!(fs::read_to_string(tmp.path().join("registry.txt")).unwrap(), "core\n");
    assert!(!tmp.path().join("proxy").exists());
  }

  #[test]
  fn test_failed_verification_rolls_back() {
    let (tmp, config) = setup(&[]);
    let registry = testing::registry();
    let creator = RepoCreator::new(tmp.path(), tmp.path().join("rail.toml"), &config, &registry);

    let err = creator.create(&CreateRequest::new("broken-tool", "script")).unwrap_err();
    assert!(matches!(err, RailError::Phase { ref phase, .. } if phase == "verify"));
    assert!(matches!(err.root_cause(), RailError::Build { .. }));
    assert_eq!(fs::read_to_string(tmp.path().join("rail.toml")).unwrap(), CONFIG);
    assert!(!tmp.path().join("broken-tool").exists());
  }

  #[test]
  fn test_failed_nested_creation_removes_created_parents() {
    let (tmp, config) = setup(&[]);
    fs::create_dir_all(tmp.path().join("libs")).unwrap();
    let registry = testing::registry();
    let creator = RepoCreator::new(tmp.path(), tmp.path().join("rail.toml"), &config, &registry);

    let nested = CreateRequest {
      path: Some(PathBuf::from("tools/cli/flow")),
      ..CreateRequest::new("broken-flow", "script")
    };
    creator.create(&nested).unwrap_err();
    assert!(!tmp.path().join("tools").exists());

    let existing_parent = CreateRequest {
      path: Some(PathBuf::from("libs/flow")),
      ..CreateRequest::new("broken-lib", "script")
    };
    creator.create(&existing_parent).unwrap_err();
    assert!(tmp.path().join("libs").is_dir());
    assert!(!tmp.path().join("libs/flow").exists());
  }

  #[test]
  fn test_custom_path_is_registered() {
    let (tmp, config) = setup(&[]);
    let registry = testing::registry();
    let creator = RepoCreator::new(tmp.path(), tmp.path().join("rail.toml"), &config, &registry);

    let request = CreateRequest {
      path: Some(PathBuf::from("tools/flow")),
      ..CreateRequest::new("flow", "script")
    };
    let dir = creator.create(&request).unwrap();
    assert!(dir.join("build.sh").exists());
    assert!(dir.join(".git").exists());

    let config = RailConfig::load(tmp.path()).unwrap();
    assert_eq!(config.workspace("flow").unwrap().path, PathBuf::from("tools/flow"));
  }

  #[test]
  fn test_successful_creation_with_registration() {
    let (tmp, config) = setup(&["sh", "-c", "echo {name}:{path} >> registry.txt"]);
    let registry = testing::registry();
    let creator = RepoCreator::new(tmp.path(), tmp.path().join("rail.toml"), &config, &registry);

    let mut request = CreateRequest::new("proxy", "script");
    request.register = true;
    creator.create(&request).unwrap();

    let written = fs::read_to_string(tmp.path().join("rail.toml")).unwrap();
    assert!(written.starts_with("# ecosystem root\n"));
    assert!(written.contains("name = \"proxy\""));
    assert_eq!(
      fs::read_to_string(tmp.path().join("registry.txt")).unwrap(),
      "core\nproxy:proxy\n"
    );
  }

  #[test]
  fn test_existing_directory_is_rejected_untouched() {
    let (tmp, config) = setup(&[]);
    fs::create_dir_all(tmp.path().join("proxy")).unwrap();
    let registry = testing::registry();
    let creator = RepoCreator::new(tmp.path(), tmp.path().join("rail.toml"), &config, &registry);

    let err = creator.create(&CreateRequest::new("proxy", "script")).unwrap_err();
    assert!(matches!(err, RailError::Validation(ValidationError::AlreadyExists { .. })));
    assert!(tmp.path().join("proxy").exists());
  }

  #[test]
  fn test_unknown_kind() {
    let (tmp, config) = setup(&[]);
    let registry = testing::registry();
    let creator = RepoCreator::new(tmp.path(), tmp.path().join("rail.toml"), &config, &registry);

    let err = creator.create(&CreateRequest::new("x", "haskell")).unwrap_err();
    assert!(matches!(err, RailError::HandlerNotFound { .. }));
  }
}
