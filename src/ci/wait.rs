//! Two-phase CI wait protocol
//!
//! Phase A waits out whatever CI is already running for the repository
//! (excluding the release workflow) so a release never lands on a red build.
//! Phase B runs after the tag push: it polls until the release workflow run
//! for that tag shows up, then watches it to completion.
//!
//! Both phases block on a timed poll loop and check the cancel token every
//! tick.

use super::provider::{CiProvider, WatchOutcome, WorkflowRun};
use crate::core::cancel::CancelToken;
use crate::core::config::CiSettings;
use crate::core::error::{CiError, RailError, RailResult, WaitPhase};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on one uninterrupted sleep, so cancellation is noticed quickly
const SLEEP_SLICE: Duration = Duration::from_millis(100);

pub struct WaitProtocol {
  provider: Arc<dyn CiProvider>,
  interval: Duration,
  discovery_timeout: Duration,
  overall_timeout: Duration,
  run_limit: usize,
  release_workflow: String,
  cancel: CancelToken,
}

impl WaitProtocol {
  pub fn new(provider: Arc<dyn CiProvider>, settings: &CiSettings) -> Self {
    Self {
      provider,
      interval: settings.poll_interval(),
      discovery_timeout: settings.discovery_timeout(),
      overall_timeout: settings.overall_timeout(),
      run_limit: settings.run_limit.max(1),
      release_workflow: settings.release_workflow.clone(),
      cancel: CancelToken::new(),
    }
  }

  /// Override poll interval and both deadlines
  pub fn with_timing(mut self, interval: Duration, discovery_timeout: Duration, overall_timeout: Duration) -> Self {
    self.interval = interval;
    self.discovery_timeout = discovery_timeout;
    self.overall_timeout = overall_timeout;
    self
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  fn is_release_run(&self, run: &WorkflowRun) -> bool {
    run.workflow_name.eq_ignore_ascii_case(&self.release_workflow)
  }

  /// Phase A: wait for the most recent non-release run.
  ///
  /// Finding no run at all is not an error: repositories without CI are
  /// released with a warning.
  pub fn wait_preexisting(&self, repo_dir: &Path) -> RailResult<()> {
    let phase = WaitPhase::PreexistingCi;
    self.check_cancelled(repo_dir)?;

    let runs = self
      .provider
      .list_runs(repo_dir, self.run_limit)
      .map_err(|e| watch_failed(phase, None, e))?;

    let latest = runs
      .into_iter()
      .filter(|run| !self.is_release_run(run))
      .max_by(|a, b| a.created_at.cmp(&b.created_at));

    let Some(run) = latest else {
      warn!(repo = %repo_dir.display(), "no CI runs found, proceeding without CI gate");
      return Ok(());
    };

    info!(repo = %repo_dir.display(), run_id = run.id, workflow = %run.workflow_name, status = %run.status, "waiting for existing CI");
    self.settle(phase, repo_dir, &run, Instant::now() + self.overall_timeout)
  }

  /// Phase B: find the release workflow run for `tag` and watch it.
  pub fn wait_release(&self, repo_dir: &Path, tag: &str) -> RailResult<()> {
    let phase = WaitPhase::ReleaseWorkflow;
    let started = Instant::now();
    let discovery_deadline = started + self.discovery_timeout;
    let mut attempts: u32 = 0;

    let run = loop {
      self.check_cancelled(repo_dir)?;
      attempts += 1;

      let runs = self
        .provider
        .list_runs(repo_dir, self.run_limit)
        .map_err(|e| watch_failed(phase, None, e))?;
      if let Some(run) = runs
        .into_iter()
        .find(|run| run.head_branch == tag && self.is_release_run(run))
      {
        debug!(repo = %repo_dir.display(), run_id = run.id, attempts, "release workflow discovered");
        break run;
      }

      let now = Instant::now();
      if now >= discovery_deadline {
        return Err(
          CiError::DiscoveryTimeout {
            phase,
            workflow: self.release_workflow.clone(),
            reference: tag.to_string(),
            attempts,
            waited: now - started,
          }
          .into(),
        );
      }
      self.sleep((discovery_deadline - now).min(self.interval));
    };

    info!(repo = %repo_dir.display(), run_id = run.id, %tag, "watching release workflow");
    self.settle(phase, repo_dir, &run, started + self.overall_timeout)
  }

  /// Phase A then, after the caller's push, phase B
  pub fn wait(&self, repo_dir: &Path, tag: &str) -> RailResult<()> {
    self.wait_preexisting(repo_dir)?;
    self.wait_release(repo_dir, tag)
  }

  /// Resolve a discovered run: use its conclusion when terminal, otherwise watch it
  fn settle(&self, phase: WaitPhase, repo_dir: &Path, run: &WorkflowRun, deadline: Instant) -> RailResult<()> {
    if run.is_terminal() {
      return conclude(phase, run.id, run.conclusion(), None);
    }

    let outcome = self
      .provider
      .watch(repo_dir, run.id, deadline, &self.cancel)
      .map_err(|e| watch_failed(phase, Some(run.id), e))?;

    match outcome {
      WatchOutcome::Succeeded => Ok(()),
      WatchOutcome::Failed { exit_code } => {
        let conclusion = self.lookup_conclusion(repo_dir, run.id);
        conclude(phase, run.id, &conclusion, exit_code)
      }
      WatchOutcome::TimedOut => Err(
        CiError::WatchFailed {
          phase,
          run_id: Some(run.id),
          reason: format!("run did not finish within {}s", self.overall_timeout.as_secs()),
        }
        .into(),
      ),
      WatchOutcome::Cancelled => Err(self.cancelled(repo_dir)),
    }
  }

  /// Best-effort conclusion for a failed watch
  fn lookup_conclusion(&self, repo_dir: &Path, run_id: u64) -> String {
    self
      .provider
      .list_runs(repo_dir, self.run_limit)
      .ok()
      .and_then(|runs| runs.into_iter().find(|r| r.id == run_id))
      .and_then(|r| r.conclusion.filter(|c| !c.is_empty()))
      .unwrap_or_else(|| "failure".to_string())
  }

  fn check_cancelled(&self, repo_dir: &Path) -> RailResult<()> {
    if self.cancel.is_cancelled() {
      return Err(self.cancelled(repo_dir));
    }
    Ok(())
  }

  fn cancelled(&self, repo_dir: &Path) -> RailError {
    RailError::Cancelled {
      job: format!("ci wait ({})", repo_dir.display()),
    }
  }

  /// Sleep up to `total`, waking early on cancellation
  fn sleep(&self, total: Duration) {
    let end = Instant::now() + total;
    while !self.cancel.is_cancelled() {
      let now = Instant::now();
      if now >= end {
        break;
      }
      thread::sleep((end - now).min(SLEEP_SLICE));
    }
  }
}

fn conclude(phase: WaitPhase, run_id: u64, conclusion: &str, exit_code: Option<i32>) -> RailResult<()> {
  if matches!(conclusion, "success" | "skipped" | "neutral") {
    return Ok(());
  }
  Err(
    CiError::WorkflowFailed {
      phase,
      run_id,
      conclusion: conclusion.to_string(),
      exit_code,
    }
    .into(),
  )
}

fn watch_failed(phase: WaitPhase, run_id: Option<u64>, error: RailError) -> RailError {
  CiError::WatchFailed {
    phase,
    run_id,
    reason: error.to_string(),
  }
  .into()
}
