//! `eco-rail build`: run build/test/verify across the ecosystem, level by level

use crate::build::{BuildRunner, JobKind, JobStatus, first_failure};
use crate::core::context::EcosystemContext;
use crate::core::error::{RailError, RailResult};
use crate::graph::topological_levels;
use crate::ui::progress::LevelProgress;
use std::sync::mpsc;
use std::thread;

/// Lines of output shown for each failed job
const OUTPUT_TAIL: usize = 20;

pub fn run_build(
  ctx: &EcosystemContext,
  workspaces: Vec<String>,
  jobs: Option<usize>,
  keep_going: bool,
  kind: JobKind,
) -> RailResult<()> {
  let subset = (!workspaces.is_empty()).then_some(workspaces.as_slice());
  let levels = topological_levels(&ctx.graph, subset)?;
  if levels.is_empty() {
    println!("⚠️  No workspaces to {}", kind);
    return Ok(());
  }

  let total: usize = levels.iter().map(Vec::len).sum();
  let settings = &ctx.config.build;
  let runner = BuildRunner::new(jobs.or(settings.workers)).continue_on_error(keep_going || settings.continue_on_error);
  println!(
    "🔨 {} {} workspace(s) in {} level(s) with {} worker(s)",
    kind,
    total,
    levels.len(),
    runner.workers()
  );

  let progress = LevelProgress::new();
  let (tx, rx) = mpsc::channel();
  let runner = &runner;
  let levels = &levels;

  let results = thread::scope(|s| {
    let handle = s.spawn(move || {
      runner.run_levels(&ctx.graph, levels, &ctx.registry, kind, &settings.bin_dirs, Some(tx))
    });
    for event in rx {
      progress.handle(&event);
    }
    handle
      .join()
      .unwrap_or_else(|_| Err(RailError::message("build worker thread panicked")))
  })?;

  println!();
  for result in &results {
    let secs = result.duration.as_secs_f64();
    match result.status() {
      JobStatus::Succeeded => println!("  ✅ {} ({:.1}s)", result.job, secs),
      JobStatus::Cancelled => println!("  ⏭️  {} (cancelled)", result.job),
      JobStatus::Failed { exit_code } => {
        let code = exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        println!("  ❌ {} (exit {}, {:.1}s)", result.job, code, secs);
        let lines: Vec<&str> = result.output.lines().collect();
        for line in &lines[lines.len().saturating_sub(OUTPUT_TAIL)..] {
          println!("     │ {}", line);
        }
      }
    }
  }

  match first_failure(results) {
    Some(err) => Err(err),
    None => {
      println!();
      println!("✅ All {} job(s) succeeded", total);
      Ok(())
    }
  }
}

