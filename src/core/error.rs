//! Error types for eco-rail with contextual messages and exit codes
//!
//! One unified error type categorizes every failure the engine can surface and
//! carries a help message where a next step is obvious. Phase wrappers let the
//! orchestrator report *where* a release or creation run failed without losing
//! the underlying cause.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Exit codes for eco-rail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
  /// User error (config, invalid args, missing files)
  User = 1,
  /// System error (git, network, I/O, external tools)
  System = 2,
  /// Validation failure (pre-flight checks, cycles)
  Validation = 3,
  /// Build or CI failure
  Failed = 4,
  /// Run cancelled before completion
  Cancelled = 130,
}

impl ExitCode {
  /// Convert to i32 for process exit
  pub fn as_i32(self) -> i32 {
    self as i32
  }
}

/// Main error type for eco-rail
#[derive(Debug)]
pub enum RailError {
  /// Configuration errors
  Config(ConfigError),

  /// Git operation errors
  Git(GitError),

  /// Pre-flight validation errors
  Validation(ValidationError),

  /// I/O errors
  Io(io::Error),

  /// Dependency cycle among workspaces (every implicated module, sorted)
  Cycle { modules: Vec<String> },

  /// No project handler registered for a declared workspace type
  HandlerNotFound { kind: String },

  /// A build/test/verify command exited non-zero
  Build {
    job: String,
    exit_code: Option<i32>,
    output: String,
  },

  /// Work was abandoned because the run was cancelled
  Cancelled { job: String },

  /// CI supervision failed
  Ci(CiError),

  /// An error tagged with the orchestration phase it came from
  Phase { phase: String, source: Box<RailError> },

  /// Generic error with message and optional context
  Message {
    message: String,
    context: Option<String>,
    help: Option<String>,
  },
}

impl RailError {
  /// Create a simple error message
  pub fn message(msg: impl Into<String>) -> Self {
    RailError::Message {
      message: msg.into(),
      context: None,
      help: None,
    }
  }

  /// Create an error with help text
  pub fn with_help(msg: impl Into<String>, help: impl Into<String>) -> Self {
    RailError::Message {
      message: msg.into(),
      context: None,
      help: Some(help.into()),
    }
  }

  /// Tag an error with the phase it occurred in
  pub fn in_phase(self, phase: impl Into<String>) -> Self {
    RailError::Phase {
      phase: phase.into(),
      source: Box::new(self),
    }
  }

  /// Add context to an existing error
  pub fn context(self, ctx: impl Into<String>) -> Self {
    let ctx_str = ctx.into();
    match self {
      RailError::Message { message, context, help } => RailError::Message {
        message,
        context: Some(context.map(|c| format!("{}\n{}", ctx_str, c)).unwrap_or(ctx_str)),
        help,
      },
      RailError::Io(e) => RailError::Message {
        message: format!("I/O error: {}", e),
        context: Some(ctx_str),
        help: None,
      },
      _ => self,
    }
  }

  /// True when the error means "did not run because of cancellation" rather
  /// than a genuine failure.
  pub fn is_cancellation(&self) -> bool {
    match self {
      RailError::Cancelled { .. } => true,
      RailError::Phase { source, .. } => source.is_cancellation(),
      _ => false,
    }
  }

  /// Strip phase wrappers
  pub fn root_cause(&self) -> &RailError {
    match self {
      RailError::Phase { source, .. } => source.root_cause(),
      other => other,
    }
  }

  /// Get the appropriate exit code for this error
  pub fn exit_code(&self) -> ExitCode {
    match self {
      RailError::Config(_) => ExitCode::User,
      RailError::Git(_) => ExitCode::System,
      RailError::Validation(_) => ExitCode::Validation,
      RailError::Io(_) => ExitCode::System,
      RailError::Cycle { .. } => ExitCode::Validation,
      RailError::HandlerNotFound { .. } => ExitCode::User,
      RailError::Build { .. } => ExitCode::Failed,
      RailError::Cancelled { .. } => ExitCode::Cancelled,
      RailError::Ci(_) => ExitCode::Failed,
      RailError::Phase { source, .. } => source.exit_code(),
      RailError::Message { .. } => ExitCode::User,
    }
  }

  /// Get contextual help message for this error
  pub fn help_message(&self) -> Option<String> {
    match self {
      RailError::Config(e) => e.help_message(),
      RailError::Git(e) => e.help_message(),
      RailError::Validation(e) => e.help_message(),
      RailError::Cycle { .. } => {
        Some("Break the cycle by removing one of the dependencies between the listed workspaces.".to_string())
      }
      RailError::HandlerNotFound { .. } => Some("Supported workspace types: go, cargo, node.".to_string()),
      RailError::Ci(e) => e.help_message(),
      RailError::Phase { source, .. } => source.help_message(),
      RailError::Message { help, .. } => help.clone(),
      _ => None,
    }
  }
}

impl fmt::Display for RailError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RailError::Config(e) => write!(f, "{}", e),
      RailError::Git(e) => write!(f, "{}", e),
      RailError::Validation(e) => write!(f, "{}", e),
      RailError::Io(e) => write!(f, "I/O error: {}", e),
      RailError::Cycle { modules } => {
        write!(f, "Dependency cycle detected among: {}", modules.join(", "))
      }
      RailError::HandlerNotFound { kind } => write!(f, "No handler for type '{}'", kind),
      RailError::Build {
        job,
        exit_code,
        output,
      } => {
        match exit_code {
          Some(code) => write!(f, "Build '{}' failed with exit code {}", job, code)?,
          None => write!(f, "Build '{}' was terminated by a signal", job)?,
        }
        if !output.is_empty() {
          write!(f, "\n{}", output.trim_end())?;
        }
        Ok(())
      }
      RailError::Cancelled { job } => write!(f, "'{}' cancelled after an earlier failure", job),
      RailError::Ci(e) => write!(f, "{}", e),
      RailError::Phase { phase, source } => write!(f, "[{}] {}", phase, source),
      RailError::Message { message, context, .. } => {
        write!(f, "{}", message)?;
        if let Some(ctx) = context {
          write!(f, "\n{}", ctx)?;
        }
        Ok(())
      }
    }
  }
}

impl std::error::Error for RailError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      RailError::Io(e) => Some(e),
      RailError::Phase { source, .. } => Some(source.as_ref()),
      _ => None,
    }
  }
}

impl From<io::Error> for RailError {
  fn from(err: io::Error) -> Self {
    RailError::Io(err)
  }
}

impl From<String> for RailError {
  fn from(msg: String) -> Self {
    RailError::message(msg)
  }
}

impl From<&str> for RailError {
  fn from(msg: &str) -> Self {
    RailError::message(msg)
  }
}

impl From<CiError> for RailError {
  fn from(err: CiError) -> Self {
    RailError::Ci(err)
  }
}

impl From<toml_edit::TomlError> for RailError {
  fn from(err: toml_edit::TomlError) -> Self {
    RailError::message(format!("TOML parse error: {}", err))
  }
}

impl From<toml_edit::de::Error> for RailError {
  fn from(err: toml_edit::de::Error) -> Self {
    RailError::message(format!("TOML deserialization error: {}", err))
  }
}

impl From<serde_json::Error> for RailError {
  fn from(err: serde_json::Error) -> Self {
    RailError::message(format!("JSON error: {}", err))
  }
}

impl From<semver::Error> for RailError {
  fn from(err: semver::Error) -> Self {
    RailError::message(format!("Version parse error: {}", err))
  }
}

impl From<std::string::FromUtf8Error> for RailError {
  fn from(err: std::string::FromUtf8Error) -> Self {
    RailError::message(format!("UTF-8 conversion error: {}", err))
  }
}

impl From<std::path::StripPrefixError> for RailError {
  fn from(err: std::path::StripPrefixError) -> Self {
    RailError::message(format!("Path strip prefix error: {}", err))
  }
}

impl From<rayon::ThreadPoolBuildError> for RailError {
  fn from(err: rayon::ThreadPoolBuildError) -> Self {
    RailError::message(format!("Failed to start worker pool: {}", err))
  }
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
  /// rail.toml not found
  NotFound { workspace_root: PathBuf },

  /// Missing or empty required field
  MissingField { field: String },

  /// Workspace not declared in configuration
  WorkspaceNotFound { name: String },

  /// A value is present but unusable
  Invalid { field: String, reason: String },
}

impl ConfigError {
  fn help_message(&self) -> Option<String> {
    match self {
      ConfigError::NotFound { .. } => {
        Some("Create a rail.toml with one [[workspaces]] entry per repository.".to_string())
      }
      ConfigError::WorkspaceNotFound { name } => Some(format!(
        "Run `eco-rail graph` to list known workspaces. Is '{}' declared under [[workspaces]]?",
        name
      )),
      _ => None,
    }
  }
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigError::NotFound { workspace_root } => {
        write!(
          f,
          "No eco-rail configuration found.\nExpected file: {}/rail.toml",
          workspace_root.display()
        )
      }
      ConfigError::MissingField { field } => {
        write!(f, "Missing required field in config: {}", field)
      }
      ConfigError::WorkspaceNotFound { name } => {
        write!(f, "Workspace '{}' not found in configuration", name)
      }
      ConfigError::Invalid { field, reason } => {
        write!(f, "Invalid config value for {}: {}", field, reason)
      }
    }
  }
}

/// Git operation errors
#[derive(Debug)]
pub enum GitError {
  /// Git command failed
  CommandFailed { command: String, stderr: String },

  /// Repository not found
  RepoNotFound { path: PathBuf },

  /// Push failed
  PushFailed {
    remote: String,
    refname: String,
    reason: String,
  },
}

impl GitError {
  fn help_message(&self) -> Option<String> {
    match self {
      GitError::PushFailed { reason, .. } => {
        if reason.contains("non-fast-forward") || reason.contains("rejected") {
          Some("The remote has commits you don't have. Pull and re-run the release.".to_string())
        } else if reason.contains("permission denied") || reason.contains("403") {
          Some("Check your credentials for the remote (gh auth status).".to_string())
        } else {
          None
        }
      }
      GitError::RepoNotFound { path } => Some(format!(
        "Initialize the repository first or check the path: {}",
        path.display()
      )),
      _ => None,
    }
  }
}

impl fmt::Display for GitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GitError::CommandFailed { command, stderr } => {
        write!(f, "Git command failed: {}\n{}", command, stderr)
      }
      GitError::RepoNotFound { path } => {
        write!(f, "Git repository not found at: {}", path.display())
      }
      GitError::PushFailed {
        remote,
        refname,
        reason,
      } => {
        write!(f, "Push of {} to {} failed: {}", refname, remote, reason)
      }
    }
  }
}

/// Pre-flight validation errors
#[derive(Debug)]
pub enum ValidationError {
  /// Working tree has uncommitted changes
  DirtyWorkTree { repo: String },

  /// A changelog was edited by hand after it was generated
  ChangelogDirty { repo: String, path: PathBuf },

  /// Target of a creation run already exists
  AlreadyExists { path: PathBuf },

  /// Workspace layout is unusable
  WorkspaceInvalid { reason: String },
}

impl ValidationError {
  fn help_message(&self) -> Option<String> {
    match self {
      ValidationError::DirtyWorkTree { .. } => Some("Commit or stash local changes before releasing.".to_string()),
      ValidationError::ChangelogDirty { repo, .. } => Some(format!(
        "Keep the edits and mark the changelog reviewed with `eco-rail release changelog {} --accept`, or regenerate it.",
        repo
      )),
      ValidationError::AlreadyExists { .. } => Some("Choose another name or remove the directory.".to_string()),
      ValidationError::WorkspaceInvalid { .. } => None,
    }
  }
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ValidationError::DirtyWorkTree { repo } => {
        write!(f, "Workspace '{}' has uncommitted changes", repo)
      }
      ValidationError::ChangelogDirty { repo, path } => {
        write!(
          f,
          "Changelog for '{}' changed since it was generated: {}",
          repo,
          path.display()
        )
      }
      ValidationError::AlreadyExists { path } => {
        write!(f, "Path already exists: {}", path.display())
      }
      ValidationError::WorkspaceInvalid { reason } => {
        write!(f, "Workspace validation failed: {}", reason)
      }
    }
  }
}

/// Which half of the CI wait protocol failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
  /// CI already running for the pushed commit
  PreexistingCi,
  /// Workflow triggered by the release tag
  ReleaseWorkflow,
}

impl fmt::Display for WaitPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WaitPhase::PreexistingCi => write!(f, "pre-existing CI"),
      WaitPhase::ReleaseWorkflow => write!(f, "release workflow"),
    }
  }
}

/// CI supervision errors
#[derive(Debug)]
pub enum CiError {
  /// The expected workflow run never appeared
  DiscoveryTimeout {
    phase: WaitPhase,
    workflow: String,
    reference: String,
    attempts: u32,
    waited: Duration,
  },

  /// A workflow run concluded unsuccessfully
  WorkflowFailed {
    phase: WaitPhase,
    run_id: u64,
    conclusion: String,
    exit_code: Option<i32>,
  },

  /// The polling/watch tool itself errored
  WatchFailed {
    phase: WaitPhase,
    run_id: Option<u64>,
    reason: String,
  },
}

impl CiError {
  /// Phase the error belongs to
  pub fn phase(&self) -> WaitPhase {
    match self {
      CiError::DiscoveryTimeout { phase, .. } => *phase,
      CiError::WorkflowFailed { phase, .. } => *phase,
      CiError::WatchFailed { phase, .. } => *phase,
    }
  }

  fn help_message(&self) -> Option<String> {
    match self {
      CiError::DiscoveryTimeout { workflow, .. } => Some(format!(
        "Check that workflow '{}' triggers on tag pushes, or raise ci.discovery_timeout_secs.",
        workflow
      )),
      CiError::WorkflowFailed { run_id, .. } => Some(format!("Inspect the run with: gh run view {} --log-failed", run_id)),
      CiError::WatchFailed { .. } => Some("Check `gh auth status` and network access.".to_string()),
    }
  }
}

impl fmt::Display for CiError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CiError::DiscoveryTimeout {
        phase,
        workflow,
        reference,
        attempts,
        waited,
      } => write!(
        f,
        "{}: workflow '{}' for '{}' did not appear after {} attempt(s) ({}s)",
        phase,
        workflow,
        reference,
        attempts,
        waited.as_secs()
      ),
      CiError::WorkflowFailed {
        phase,
        run_id,
        conclusion,
        exit_code,
      } => {
        write!(f, "{}: run {} concluded '{}'", phase, run_id, conclusion)?;
        if let Some(code) = exit_code {
          write!(f, " (exit code {})", code)?;
        }
        Ok(())
      }
      CiError::WatchFailed { phase, run_id, reason } => match run_id {
        Some(id) => write!(f, "{}: watching run {} failed: {}", phase, id, reason),
        None => write!(f, "{}: listing runs failed: {}", phase, reason),
      },
    }
  }
}

/// Result type alias for eco-rail
pub type RailResult<T> = Result<T, RailError>;

/// Helper trait to add context to Results
pub trait ResultExt<T> {
  /// Add context to an error result
  fn context(self, ctx: impl Into<String>) -> RailResult<T>;

  /// Add context using a closure (lazy evaluation)
  fn with_context<F>(self, f: F) -> RailResult<T>
  where
    F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
  E: Into<RailError>,
{
  fn context(self, ctx: impl Into<String>) -> RailResult<T> {
    self.map_err(|e| e.into().context(ctx))
  }

  fn with_context<F>(self, f: F) -> RailResult<T>
  where
    F: FnOnce() -> String,
  {
    self.map_err(|e| e.into().context(f()))
  }
}

/// Pretty-print an error to stderr with help text
pub fn print_error(error: &RailError) {
  eprintln!("\n❌ {}\n", error);

  if let Some(help) = error.help_message() {
    eprintln!("💡 Help: {}\n", help);
  }
}
