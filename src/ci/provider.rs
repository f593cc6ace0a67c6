//! Workflow run listing and watching
//!
//! [`GhCli`] drives the GitHub CLI. Tests substitute scripted providers.

use crate::core::cancel::CancelToken;
use crate::core::error::{RailError, RailResult, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fields requested from `gh run list`
const RUN_FIELDS: &str = "databaseId,status,conclusion,headBranch,workflowName,createdAt";

/// How often a running `gh run watch` child is checked for deadline/cancel
const CHILD_POLL: Duration = Duration::from_millis(200);

/// One workflow run as reported by `gh run list --json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
  #[serde(rename = "databaseId")]
  pub id: u64,
  pub status: String,
  #[serde(default)]
  pub conclusion: Option<String>,
  #[serde(default)]
  pub head_branch: String,
  #[serde(default)]
  pub workflow_name: String,
  #[serde(default)]
  pub created_at: String,
}

impl WorkflowRun {
  pub fn is_terminal(&self) -> bool {
    self.status == "completed"
  }

  /// Terminal conclusions that do not block a release
  pub fn is_success(&self) -> bool {
    matches!(self.conclusion(), "success" | "skipped" | "neutral")
  }

  pub fn conclusion(&self) -> &str {
    self.conclusion.as_deref().unwrap_or("")
  }
}

/// How a watch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
  Succeeded,
  Failed { exit_code: Option<i32> },
  TimedOut,
  Cancelled,
}

/// Source of workflow run information for a repository
pub trait CiProvider: Send + Sync {
  /// Most recent runs, newest first
  fn list_runs(&self, repo_dir: &Path, limit: usize) -> RailResult<Vec<WorkflowRun>>;

  /// Block until the run finishes, `deadline` passes, or `cancel` fires
  fn watch(&self, repo_dir: &Path, run_id: u64, deadline: Instant, cancel: &CancelToken) -> RailResult<WatchOutcome>;
}

/// GitHub CLI backed provider
#[derive(Debug, Clone)]
pub struct GhCli {
  program: String,
  /// Refresh interval passed to `gh run watch`
  watch_interval: Duration,
}

impl Default for GhCli {
  fn default() -> Self {
    Self {
      program: "gh".to_string(),
      watch_interval: Duration::from_secs(10),
    }
  }
}

impl GhCli {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_watch_interval(mut self, interval: Duration) -> Self {
    self.watch_interval = interval;
    self
  }

  fn command(&self, repo_dir: &Path) -> Command {
    let mut cmd = Command::new(&self.program);
    cmd.current_dir(repo_dir).env("GH_PROMPT_DISABLED", "1").env("NO_COLOR", "1");
    cmd
  }
}

impl CiProvider for GhCli {
  fn list_runs(&self, repo_dir: &Path, limit: usize) -> RailResult<Vec<WorkflowRun>> {
    let limit = limit.to_string();
    let output = self
      .command(repo_dir)
      .args(["run", "list", "--limit", &limit, "--json", RUN_FIELDS])
      .output()
      .context("Failed to run gh run list")?;

    if !output.status.success() {
      return Err(RailError::message(format!(
        "gh run list failed in {}: {}",
        repo_dir.display(),
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    parse_runs(&String::from_utf8_lossy(&output.stdout))
  }

  fn watch(&self, repo_dir: &Path, run_id: u64, deadline: Instant, cancel: &CancelToken) -> RailResult<WatchOutcome> {
    let interval = self.watch_interval.as_secs().max(1).to_string();
    debug!(repo = %repo_dir.display(), run_id, "gh run watch");

    // output is not needed, and an undrained pipe could stall the child
    let mut child = self
      .command(repo_dir)
      .args(["run", "watch", &run_id.to_string(), "--exit-status", "--interval", &interval])
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .context("Failed to spawn gh run watch")?;

    loop {
      if let Some(status) = child.try_wait().context("Failed to poll gh run watch")? {
        return Ok(if status.success() {
          WatchOutcome::Succeeded
        } else {
          WatchOutcome::Failed {
            exit_code: status.code(),
          }
        });
      }

      let outcome = if cancel.is_cancelled() {
        Some(WatchOutcome::Cancelled)
      } else if Instant::now() >= deadline {
        Some(WatchOutcome::TimedOut)
      } else {
        None
      };

      if let Some(outcome) = outcome {
        child.kill().ok();
        child.wait().ok();
        return Ok(outcome);
      }

      thread::sleep(CHILD_POLL);
    }
  }
}

/// Parse `gh run list --json` output
pub fn parse_runs(json: &str) -> RailResult<Vec<WorkflowRun>> {
  if json.trim().is_empty() {
    return Ok(Vec::new());
  }
  Ok(serde_json::from_str(json)?)
}
