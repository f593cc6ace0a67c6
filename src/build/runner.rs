//! Bounded worker pool for build/test/verify jobs
//!
//! # Design
//!
//! - A dedicated rayon pool with exactly `workers` threads; each worker pulls
//!   the next job from a shared queue, so at most `workers` children run at once.
//! - One [`CancelToken`] is shared by every worker. The first failure trips it
//!   (unless `continue_on_error`); queued jobs then resolve as cancelled without
//!   spawning and running children are killed on the next poll.
//! - Children run with color disabled and extra tool directories prepended to
//!   `PATH`.

use super::{BuildEvent, BuildJob, BuildResult, JobKind};
use crate::core::cancel::CancelToken;
use crate::core::error::{RailError, RailResult, ResultExt};
use crate::graph::EcosystemGraph;
use crate::handlers::HandlerRegistry;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a worker checks its child and the cancel token
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct BuildRunner {
  workers: usize,
  continue_on_error: bool,
  extra_path: Vec<PathBuf>,
  cancel: CancelToken,
}

impl BuildRunner {
  /// Runner with `workers` threads (default: available parallelism, at least 1)
  pub fn new(workers: Option<usize>) -> Self {
    let workers = workers
      .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
      .max(1);
    Self {
      workers,
      continue_on_error: false,
      extra_path: Vec::new(),
      cancel: CancelToken::new(),
    }
  }

  pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
    self.continue_on_error = continue_on_error;
    self
  }

  /// Directories prepended to `PATH` for every job
  pub fn with_extra_path(mut self, dirs: Vec<PathBuf>) -> Self {
    self.extra_path = dirs;
    self
  }

  /// Share an existing token (e.g. with a CI wait running alongside)
  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// Run every job; results come back in job order
  pub fn run(&self, jobs: Vec<BuildJob>) -> RailResult<Vec<BuildResult>> {
    self.execute(jobs, &self.extra_path, None)
  }

  /// Like [`run`](Self::run), also emitting events as jobs progress
  /// Run jobs with `dirs` searched before the runner's own extra path
  pub fn run_with_path(&self, jobs: Vec<BuildJob>, dirs: &[PathBuf]) -> RailResult<Vec<BuildResult>> {
    let extra_path: Vec<PathBuf> = dirs.iter().chain(&self.extra_path).cloned().collect();
    self.execute(jobs, &extra_path, None)
  }

  pub fn run_streaming(&self, jobs: Vec<BuildJob>, events: Sender<BuildEvent>) -> RailResult<Vec<BuildResult>> {
    self.execute(jobs, &self.extra_path, Some(events))
  }

  /// Jobs running `kind`'s handler command for each named workspace
  pub fn jobs_for(
    graph: &EcosystemGraph,
    names: &[String],
    registry: &HandlerRegistry,
    kind: JobKind,
  ) -> RailResult<Vec<BuildJob>> {
    names
      .iter()
      .map(|name| {
        let node = graph
          .node(name)
          .ok_or_else(|| RailError::message(format!("Workspace '{}' is not in the graph", name)))?;
        let handler = registry.get(&node.kind)?;
        let command = match kind {
          JobKind::Build => handler.build_command(),
          JobKind::Test => handler.test_command(),
          JobKind::Verify => handler.verify_command(),
        };
        Ok(BuildJob::new(name.clone(), node.dir.clone()).with_command(command))
      })
      .collect()
  }

  /// Run dependency levels in order, never starting level K+1 before level K
  /// finished.
  ///
  /// Each level's existing `bin_dirs` are added to `PATH` for later levels so
  /// freshly built tools shadow installed ones. After a failure (without
  /// `continue_on_error`) the remaining levels resolve as cancelled.
  pub fn run_levels(
    &self,
    graph: &EcosystemGraph,
    levels: &[Vec<String>],
    registry: &HandlerRegistry,
    kind: JobKind,
    bin_dirs: &[String],
    events: Option<Sender<BuildEvent>>,
  ) -> RailResult<Vec<BuildResult>> {
    let mut extra_path = self.extra_path.clone();
    let mut results = Vec::new();

    for (level, names) in levels.iter().enumerate() {
      let jobs = Self::jobs_for(graph, names, registry, kind)?;
      if let Some(tx) = &events {
        tx.send(BuildEvent::LevelStarted {
          level,
          jobs: names.clone(),
        })
        .ok();
      }
      info!(level, jobs = jobs.len(), %kind, "running level");

      let level_results = self.execute(jobs, &extra_path, events.clone())?;
      results.extend(level_results);

      for dir in Self::bin_paths(graph, names, bin_dirs) {
        extra_path.insert(0, dir);
      }
    }

    Ok(results)
  }

  /// Existing `bin_dirs` of the named workspaces
  pub fn bin_paths(graph: &EcosystemGraph, names: &[String], bin_dirs: &[String]) -> Vec<PathBuf> {
    names
      .iter()
      .filter_map(|name| graph.node(name))
      .flat_map(|node| bin_dirs.iter().map(|bin| node.dir.join(bin)))
      .filter(|dir| dir.is_dir())
      .collect()
  }

  fn execute(
    &self,
    jobs: Vec<BuildJob>,
    extra_path: &[PathBuf],
    events: Option<Sender<BuildEvent>>,
  ) -> RailResult<Vec<BuildResult>> {
    let total = jobs.len();
    if total == 0 {
      return Ok(Vec::new());
    }

    let path = search_path(extra_path)?;
    let threads = self.workers.min(total);
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(threads)
      .thread_name(|i| format!("eco-rail-worker-{}", i))
      .build()?;

    let queue: Mutex<VecDeque<(usize, BuildJob)>> = Mutex::new(jobs.into_iter().enumerate().collect());
    let slots: Mutex<Vec<Option<BuildResult>>> = Mutex::new((0..total).map(|_| None).collect());

    pool.scope(|scope| {
      for _ in 0..threads {
        let events = events.clone();
        let queue = &queue;
        let slots = &slots;
        let path = &path;
        scope.spawn(move |_| {
          loop {
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some((idx, job)) = next else {
              break;
            };

            let result = self.run_job(&job, path, events.as_ref());
            if let Some(err) = &result.error
              && !err.is_cancellation()
              && !self.continue_on_error
              && self.cancel.cancel()
            {
              warn!(job = %job.name, "job failed, cancelling remaining jobs");
            }

            if let Some(tx) = &events {
              tx.send(BuildEvent::Finished {
                job: job.name.clone(),
                status: result.status(),
                duration: result.duration,
              })
              .ok();
            }
            slots.lock().unwrap_or_else(PoisonError::into_inner)[idx] = Some(result);
          }
        });
      }
    });

    let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
    Ok(slots.into_iter().flatten().collect())
  }

  fn run_job(&self, job: &BuildJob, path: &OsString, events: Option<&Sender<BuildEvent>>) -> BuildResult {
    let cancelled = |duration, output| BuildResult {
      job: job.name.clone(),
      output,
      error: Some(RailError::Cancelled { job: job.name.clone() }),
      duration,
    };

    if let Some(tx) = events {
      tx.send(BuildEvent::Started { job: job.name.clone() }).ok();
    }

    if self.cancel.is_cancelled() {
      debug!(job = %job.name, "skipping, run already cancelled");
      return cancelled(Duration::ZERO, String::new());
    }

    let Some((program, args)) = job.command.split_first() else {
      return BuildResult {
        job: job.name.clone(),
        output: String::new(),
        error: Some(RailError::message(format!("Job '{}' has an empty command", job.name))),
        duration: Duration::ZERO,
      };
    };

    debug!(job = %job.name, dir = %job.dir.display(), command = ?job.command, "spawning");
    let spawned = Command::new(program)
      .args(args)
      .current_dir(&job.dir)
      .env("TERM", "dumb")
      .env("NO_COLOR", "1")
      .env("CLICOLOR", "0")
      .env("PATH", path)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .with_context(|| format!("Failed to start '{}' for {}", job.command.join(" "), job.name));

    let mut child = match spawned {
      Ok(child) => child,
      Err(err) => {
        return BuildResult {
          job: job.name.clone(),
          output: String::new(),
          error: Some(err),
          duration: Duration::ZERO,
        };
      }
    };

    let started = Instant::now();
    let (status, output, killed) = match self.supervise(job, &mut child, events) {
      Ok(outcome) => outcome,
      Err(err) => {
        child.kill().ok();
        child.wait().ok();
        return BuildResult {
          job: job.name.clone(),
          output: String::new(),
          error: Some(err),
          duration: started.elapsed(),
        };
      }
    };
    let duration = started.elapsed();

    if killed {
      return cancelled(duration, output);
    }

    let error = (!status.success()).then(|| RailError::Build {
      job: job.name.clone(),
      exit_code: status.code(),
      output: output.clone(),
    });

    BuildResult {
      job: job.name.clone(),
      output,
      error,
      duration,
    }
  }

  /// Pump output lines until the child exits, killing it if the token trips
  fn supervise(
    &self,
    job: &BuildJob,
    child: &mut Child,
    events: Option<&Sender<BuildEvent>>,
  ) -> RailResult<(ExitStatus, String, bool)> {
    let (line_tx, line_rx) = mpsc::channel::<String>();
    if let Some(stdout) = child.stdout.take() {
      forward_lines(stdout, line_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
      forward_lines(stderr, line_tx);
    }

    let mut output = String::new();
    let mut killed = false;
    let mut exited: Option<ExitStatus> = None;

    let mut record = |line: String| {
      if let Some(tx) = events {
        tx.send(BuildEvent::Output {
          job: job.name.clone(),
          line: line.clone(),
        })
        .ok();
      }
      output.push_str(&line);
      output.push('\n');
    };

    loop {
      match line_rx.recv_timeout(POLL_INTERVAL) {
        Ok(line) => record(line),
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => break,
      }

      if !killed && self.cancel.is_cancelled() {
        debug!(job = %job.name, "killing child after cancellation");
        child.kill().ok();
        killed = true;
      }
      if killed {
        if exited.is_none() {
          exited = child.try_wait()?;
        }
        // Grandchildren may hold the pipes open after a kill
        if exited.is_some() {
          break;
        }
      }
    }
    for line in line_rx.try_iter() {
      record(line);
    }

    let status = match exited {
      Some(status) => status,
      None => child.wait()?,
    };
    Ok((status, output, killed))
  }
}

/// Send each line of `reader` to `tx` from a detached thread
fn forward_lines<R: Read + Send + 'static>(reader: R, tx: Sender<String>) {
  thread::spawn(move || {
    let reader = BufReader::new(reader);
    for line in reader.lines() {
      match line {
        Ok(text) => {
          if tx.send(text).is_err() {
            break;
          }
        }
        Err(_) => break,
      }
    }
  });
}

/// `extra` directories followed by the inherited `PATH`
fn search_path(extra: &[PathBuf]) -> RailResult<OsString> {
  let inherited = std::env::var_os("PATH").unwrap_or_default();
  let dirs = extra.iter().cloned().chain(std::env::split_paths(&inherited));
  std::env::join_paths(dirs).map_err(|e| RailError::message(format!("Invalid PATH entry: {}", e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handlers::testing;
  use std::fs;
  use tempfile::TempDir;

  fn sh(name: &str, dir: &std::path::Path, script: &str) -> BuildJob {
    BuildJob::new(name, dir).with_command(["sh", "-c", script])
  }

  #[test]
  fn test_results_in_job_order() {
    let tmp = TempDir::new().unwrap();
    let jobs = vec![
      sh("slow", tmp.path(), "sleep 0.2; echo slow"),
      sh("fast", tmp.path(), "echo fast"),
    ];
    let results = BuildRunner::new(Some(2)).run(jobs).unwrap();
    assert_eq!(results[0].job, "slow");
    assert_eq!(results[0].output, "slow\n");
    assert_eq!(results[1].job, "fast");
    assert!(results.iter().all(BuildResult::is_success));
  }

  #[test]
  fn test_concurrency_never_exceeds_workers() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("log");
    // each job records start/end markers; the log is replayed to find the peak
    let script = format!(
      "echo start >> {log}; sleep 0.2; echo end >> {log}",
      log = log.display()
    );
    let jobs = (0..6).map(|i| sh(&format!("job{i}"), tmp.path(), &script)).collect();
    let results = BuildRunner::new(Some(2)).run(jobs).unwrap();
    assert!(results.iter().all(BuildResult::is_success));

    let mut running = 0i32;
    let mut peak = 0;
    for line in fs::read_to_string(&log).unwrap().lines() {
      running += if line == "start" { 1 } else { -1 };
      peak = peak.max(running);
    }
    assert!(peak <= 2, "peak concurrency {peak}");
  }

  #[test]
  fn test_fail_fast_cancels_queued_jobs() {
    let tmp = TempDir::new().unwrap();
    let jobs = vec![
      sh("broken", tmp.path(), "echo boom; exit 3"),
      sh("later1", tmp.path(), "sleep 0.1"),
      sh("later2", tmp.path(), "sleep 0.1"),
    ];
    let runner = BuildRunner::new(Some(1));
    let results = runner.run(jobs).unwrap();

    match &results[0].error {
      Some(RailError::Build { exit_code, output, .. }) => {
        assert_eq!(*exit_code, Some(3));
        assert!(output.contains("boom"));
      }
      other => panic!("expected build failure, got {other:?}"),
    }
    assert!(results[1].is_cancelled());
    assert!(results[2].is_cancelled());
    assert!(runner.cancel_token().is_cancelled());
  }

  #[test]
  fn test_running_child_is_killed_on_cancel() {
    let tmp = TempDir::new().unwrap();
    let jobs = vec![
      BuildJob::new("sleeper", tmp.path()).with_command(["sleep", "30"]),
      sh("broken", tmp.path(), "sleep 0.2; exit 1"),
    ];
    let started = Instant::now();
    let results = BuildRunner::new(Some(2)).run(jobs).unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(results[0].is_cancelled());
    assert!(!results[1].is_cancelled());
  }

  #[test]
  fn test_chatty_child_is_killed_on_cancel() {
    let tmp = TempDir::new().unwrap();
    let jobs = vec![sh("chatty", tmp.path(), "while :; do echo tick; sleep 0.01; done")];
    let runner = BuildRunner::new(Some(1));
    let cancel = runner.cancel_token();
    let trip = thread::spawn(move || {
      thread::sleep(Duration::from_millis(300));
      cancel.cancel();
    });

    let started = Instant::now();
    let results = runner.run(jobs).unwrap();
    trip.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(results[0].is_cancelled());
    assert!(results[0].output.contains("tick"));
  }

  #[test]
  fn test_continue_on_error_runs_everything() {
    let tmp = TempDir::new().unwrap();
    let jobs = vec![sh("broken", tmp.path(), "exit 1"), sh("fine", tmp.path(), "true")];
    let results = BuildRunner::new(Some(1)).continue_on_error(true).run(jobs).unwrap();
    assert!(!results[0].is_success());
    assert!(results[1].is_success());
  }

  #[test]
  fn test_streaming_event_order() {
    let tmp = TempDir::new().unwrap();
    let (tx, rx) = mpsc::channel();
    let jobs = vec![sh("echo", tmp.path(), "echo one; echo two >&2")];
    BuildRunner::new(Some(1)).run_streaming(jobs, tx).unwrap();

    let events: Vec<BuildEvent> = rx.iter().collect();
    assert_eq!(events.first(), Some(&BuildEvent::Started { job: "echo".into() }));
    assert!(matches!(events.last(), Some(BuildEvent::Finished { status: crate::build::JobStatus::Succeeded, .. })));
    let lines: Vec<&str> = events
      .iter()
      .filter_map(|e| match e {
        BuildEvent::Output { line, .. } => Some(line.as_str()),
        _ => None,
      })
      .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&"one") && lines.contains(&"two"));
    let finished = events
      .iter()
      .filter(|e| matches!(e, BuildEvent::Finished { .. }))
      .count();
    assert_eq!(finished, 1);
  }

  #[test]
  fn test_every_finished_job_was_started() {
    let tmp = TempDir::new().unwrap();
    let (tx, rx) = mpsc::channel();
    let failing = vec![sh("broken", tmp.path(), "exit 1"), sh("later", tmp.path(), "true")];
    let unspawnable = vec![BuildJob::new("missing", tmp.path()).with_command(["eco-rail-no-such-program"])];
    BuildRunner::new(Some(1)).run_streaming(failing, tx.clone()).unwrap();
    BuildRunner::new(Some(1)).run_streaming(unspawnable, tx).unwrap();

    let events: Vec<BuildEvent> = rx.iter().collect();
    for job in ["broken", "missing", "later"] {
      let own: Vec<&BuildEvent> = events
        .iter()
        .filter(|e| match e {
          BuildEvent::Started { job: j } | BuildEvent::Output { job: j, .. } | BuildEvent::Finished { job: j, .. } => {
            j == job
          }
          BuildEvent::LevelStarted { .. } => false,
        })
        .collect();
      assert!(matches!(own.first(), Some(BuildEvent::Started { .. })), "{job}: {own:?}");
      assert!(matches!(own.last(), Some(BuildEvent::Finished { .. })), "{job}: {own:?}");
      let started = own.iter().filter(|e| matches!(e, BuildEvent::Started { .. })).count();
      let finished = own.iter().filter(|e| matches!(e, BuildEvent::Finished { .. })).count();
      assert_eq!(started, finished, "{job}: {own:?}");
    }
  }

  #[test]
  fn test_child_environment() {
    let tmp = TempDir::new().unwrap();
    let tools = tmp.path().join("tools");
    fs::create_dir_all(&tools).unwrap();
    let jobs = vec![sh("env", tmp.path(), "echo $TERM $NO_COLOR $CLICOLOR; echo $PATH")];
    let results = BuildRunner::new(Some(1))
      .with_extra_path(vec![tools.clone()])
      .run(jobs)
      .unwrap();
    let mut lines = results[0].output.lines();
    assert_eq!(lines.next(), Some("dumb 1 0"));
    assert!(lines.next().unwrap().starts_with(tools.to_str().unwrap()));
  }

  #[test]
  fn test_level_runs_prepend_bin_dirs() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    testing::write_workspace(root, "core", &[], "echo $PATH\n");
    testing::write_workspace(root, "app", &["core"], "echo $PATH\n");
    fs::create_dir_all(root.join("core/bin")).unwrap();

    let registry = testing::registry();
    let workspaces = vec![testing::workspace_config("core"), testing::workspace_config("app")];
    let graph = EcosystemGraph::build(root, &workspaces, &registry).unwrap();
    let levels = crate::graph::topological_levels(&graph, None).unwrap();
    assert_eq!(levels.len(), 2);

    let (tx, rx) = mpsc::channel();
    let results = BuildRunner::new(Some(2))
      .run_levels(&graph, &levels, &registry, JobKind::Build, &["bin".to_string()], Some(tx))
      .unwrap();

    let bin = root.join("core/bin");
    assert!(!results[0].output.starts_with(bin.to_str().unwrap()));
    assert!(results[1].output.starts_with(bin.to_str().unwrap()));

    let level_events = rx
      .iter()
      .filter(|e| matches!(e, BuildEvent::LevelStarted { .. }))
      .count();
    assert_eq!(level_events, 2);
  }
}
