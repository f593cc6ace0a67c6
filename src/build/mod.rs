//! Concurrent build/test/verify execution
//!
//! Jobs run on a bounded worker pool with fail-fast cancellation. Results can
//! be collected in batch or streamed as [`BuildEvent`]s.

pub mod runner;

pub use runner::BuildRunner;

use crate::core::error::RailError;
use std::path::PathBuf;
use std::time::Duration;

/// Which handler command a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobKind {
  #[default]
  Build,
  Test,
  Verify,
}

impl std::str::FromStr for JobKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "build" => Ok(JobKind::Build),
      "test" => Ok(JobKind::Test),
      "verify" => Ok(JobKind::Verify),
      other => Err(format!("unknown job kind '{}' (expected build, test or verify)", other)),
    }
  }
}

impl std::fmt::Display for JobKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      JobKind::Build => write!(f, "build"),
      JobKind::Test => write!(f, "test"),
      JobKind::Verify => write!(f, "verify"),
    }
  }
}

/// One command to run in one workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
  pub name: String,
  pub dir: PathBuf,
  pub command: Vec<String>,
}

impl BuildJob {
  /// Job running the conventional `go build ./...`
  pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
    Self {
      name: name.into(),
      dir: dir.into(),
      command: vec!["go".to_string(), "build".to_string(), "./...".to_string()],
    }
  }

  pub fn with_command<I, S>(mut self, command: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.command = command.into_iter().map(Into::into).collect();
    self
  }
}

/// Outcome of one job
#[derive(Debug)]
pub struct BuildResult {
  pub job: String,
  /// Merged stdout/stderr
  pub output: String,
  /// `None` on success
  pub error: Option<RailError>,
  /// Process execution time (zero when the job never started)
  pub duration: Duration,
}

impl BuildResult {
  pub fn is_success(&self) -> bool {
    self.error.is_none()
  }

  /// True when the job did not run to completion because of cancellation
  pub fn is_cancelled(&self) -> bool {
    self.error.as_ref().is_some_and(RailError::is_cancellation)
  }

  pub fn status(&self) -> JobStatus {
    match &self.error {
      None => JobStatus::Succeeded,
      Some(e) if e.is_cancellation() => JobStatus::Cancelled,
      Some(RailError::Build { exit_code, .. }) => JobStatus::Failed { exit_code: *exit_code },
      Some(_) => JobStatus::Failed { exit_code: None },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
  Succeeded,
  Failed { exit_code: Option<i32> },
  Cancelled,
}

/// Progress events emitted while jobs run.
///
/// Per job: `Started`, any number of `Output` lines, then exactly one
/// `Finished`. A job cancelled before it started only emits `Finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
  /// A dependency level is about to run (level runs only)
  LevelStarted { level: usize, jobs: Vec<String> },
  Started { job: String },
  Output { job: String, line: String },
  Finished {
    job: String,
    status: JobStatus,
    duration: Duration,
  },
}

/// First genuine failure (cancellations are a consequence, not a cause)
pub fn first_failure(results: Vec<BuildResult>) -> Option<RailError> {
  let mut cancelled = None;
  for result in results {
    match result.error {
      Some(e) if e.is_cancellation() => {
        cancelled.get_or_insert(e);
      }
      Some(e) => return Some(e),
      None => {}
    }
  }
  cancelled
}

#[cfg(test)]
mod tests {
  use super::*;

  fn result(job: &str, error: Option<RailError>) -> BuildResult {
    BuildResult {
      job: job.to_string(),
      output: String::new(),
      error,
      duration: Duration::ZERO,
    }
  }

  #[test]
  fn test_first_failure_skips_cancellations() {
    let results = vec![
      result("a", None),
      result("b", Some(RailError::Cancelled { job: "b".into() })),
      result(
        "c",
        Some(RailError::Build {
          job: "c".into(),
          exit_code: Some(2),
          output: String::new(),
        }),
      ),
    ];
    let err = first_failure(results).unwrap();
    assert!(matches!(err, RailError::Build { ref job, .. } if job == "c"));
  }

  #[test]
  fn test_status_mapping() {
    assert_eq!(result("a", None).status(), JobStatus::Succeeded);
    assert_eq!(
      result("a", Some(RailError::Cancelled { job: "a".into() })).status(),
      JobStatus::Cancelled
    );
  }

  #[test]
  fn test_job_kind_parse() {
    assert_eq!("verify".parse::<JobKind>().unwrap(), JobKind::Verify);
    assert!("deploy".parse::<JobKind>().is_err());
  }
}
