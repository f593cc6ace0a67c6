//! Level-by-level release execution
//!
//! For every dependency level: pre-flight (clean tree, existing CI green),
//! snapshot, version/dependency updates, build and test, commit and tag,
//! push, then wait for the release workflow. Level K+1 starts only after
//! level K fully completed.
//!
//! A failure before a repository's push is undone completely: snapshots are
//! restored, the release commit is dropped and the local tag deleted. Pushed
//! tags cannot be taken back and are reported as manual cleanup.

use super::plan::ReleasePlan;
use super::state::ChangelogState;
use crate::build::{BuildRunner, JobKind, first_failure};
use crate::ci::WaitProtocol;
use crate::core::context::EcosystemContext;
use crate::core::error::{RailError, RailResult, ValidationError};
use crate::core::vcs::SystemGit;
use crate::graph::topological_levels;
use crate::scaffold::{FileSnapshot, RollbackReport, capture_all};
use rayon::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
  /// Report the levels without changing anything
  pub dry_run: bool,
  /// Skip both CI wait phases
  pub skip_ci: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedRepo {
  pub name: String,
  pub tag: String,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
  /// Release order
  pub levels: Vec<Vec<String>>,
  pub released: Vec<ReleasedRepo>,
}

/// In-flight release of one repository within a level
struct RepoTxn {
  name: String,
  dir: PathBuf,
  remote: String,
  git: SystemGit,
  prev_head: String,
  tag: String,
  snapshots: Vec<FileSnapshot>,
  changed: Vec<PathBuf>,
  committed: bool,
  tag_created: bool,
  pushed: bool,
}

pub struct ReleaseExecutor<'a> {
  ctx: &'a EcosystemContext,
  runner: BuildRunner,
  ci: Option<WaitProtocol>,
  options: ApplyOptions,
}

impl<'a> ReleaseExecutor<'a> {
  pub fn new(ctx: &'a EcosystemContext, runner: BuildRunner, ci: Option<WaitProtocol>, options: ApplyOptions) -> Self {
    Self {
      ctx,
      runner,
      ci,
      options,
    }
  }

  fn ci(&self) -> Option<&WaitProtocol> {
    if self.options.skip_ci {
      return None;
    }
    self.ci.as_ref()
  }

  /// Release every pending repository in the plan, saving the plan after
  /// each level.
  pub fn apply(&self, plan: &mut ReleasePlan) -> RailResult<ApplyReport> {
    plan.refresh_changelogs(&self.ctx.config)?;

    for name in plan.pending() {
      let repo = plan.repo(&name)?;
      if repo.changelog_state.is_dirty() {
        let path = self.ctx.workspace(&name)?.changelog_path(&self.ctx.root);
        return Err(RailError::Validation(ValidationError::ChangelogDirty { repo: name, path }).in_phase("preflight"));
      }
    }

    let pending = plan.pending();
    let levels = topological_levels(&self.ctx.graph, Some(pending.as_slice()))?;
    let mut report = ApplyReport {
      levels: levels.clone(),
      released: Vec::new(),
    };

    if self.options.dry_run {
      info!(levels = levels.len(), repos = pending.len(), "dry run, nothing applied");
      return Ok(report);
    }

    let mut tool_path = Vec::new();
    for (index, level) in levels.iter().enumerate() {
      info!(level = index, repos = ?level, "releasing level");
      let released = self.release_level(plan, level, &tool_path)?;
      report.released.extend(released);

      for dir in BuildRunner::bin_paths(&self.ctx.graph, level, &self.ctx.config.build.bin_dirs) {
        tool_path.insert(0, dir);
      }
    }

    Ok(report)
  }

  fn release_level(
    &self,
    plan: &mut ReleasePlan,
    level: &[String],
    tool_path: &[PathBuf],
  ) -> RailResult<Vec<ReleasedRepo>> {
    self.preflight(plan, level).map_err(|e| e.in_phase("preflight"))?;

    let mut txns = Vec::with_capacity(level.len());
    for name in level {
      txns.push(self.begin(plan, name).map_err(|e| e.in_phase("preflight"))?);
    }

    match self.run_level(plan, level, tool_path, &mut txns) {
      Ok(()) => {
        let mut released = Vec::new();
        for txn in &txns {
          plan.repo_mut(&txn.name)?.released = true;
          released.push(ReleasedRepo {
            name: txn.name.clone(),
            tag: txn.tag.clone(),
          });
        }
        plan.save()?;
        Ok(released)
      }
      Err(err) => {
        let report = rollback(&txns);
        report.log();
        Err(err)
      }
    }
  }

  /// Only the changelog may be modified, and existing CI must be green
  fn preflight(&self, plan: &ReleasePlan, level: &[String]) -> RailResult<()> {
    for name in level {
      let ws = self.ctx.workspace(name)?;
      let dir = ws.dir(&self.ctx.root);
      let git = SystemGit::open(&dir)?;
      let changelog = ws.changelog_path(&self.ctx.root);
      let changelog = changelog.strip_prefix(&dir).unwrap_or(&changelog);

      let unexpected: Vec<PathBuf> = git
        .changed_paths()?
        .into_iter()
        .filter(|path| path != changelog)
        .collect();
      if !unexpected.is_empty() {
        debug!(repo = %name, ?unexpected, "unexpected changes");
        return Err(RailError::Validation(ValidationError::DirtyWorkTree { repo: name.clone() }));
      }

      let tag = plan.repo(name)?.next_tag(&self.ctx.config.ecosystem.tag_prefix);
      if git.tag_exists(&tag)? {
        return Err(RailError::with_help(
          format!("Tag {} already exists in '{}'", tag, name),
          "Delete the tag or choose another bump with --bump.",
        ));
      }
    }

    if let Some(ci) = self.ci() {
      let dirs: Vec<PathBuf> = level
        .iter()
        .map(|name| -> RailResult<PathBuf> { Ok(self.ctx.workspace(name)?.dir(&self.ctx.root)) })
        .collect::<RailResult<_>>()?;
      let results: Vec<RailResult<()>> = dirs.par_iter().map(|dir| ci.wait_preexisting(dir)).collect();
      results.into_iter().collect::<RailResult<Vec<()>>>()?;
    }

    Ok(())
  }

  fn begin(&self, plan: &ReleasePlan, name: &str) -> RailResult<RepoTxn> {
    let ws = self.ctx.workspace(name)?;
    let dir = ws.dir(&self.ctx.root);
    let handler = self.ctx.registry.get(&ws.kind)?;
    let git = SystemGit::open(&dir)?;

    let mut paths: Vec<PathBuf> = handler.mutable_files().into_iter().map(|f| dir.join(f)).collect();
    paths.push(ws.changelog_path(&self.ctx.root));

    Ok(RepoTxn {
      name: name.to_string(),
      remote: ws.remote().to_string(),
      prev_head: git.head_commit()?,
      tag: plan.repo(name)?.next_tag(&self.ctx.config.ecosystem.tag_prefix),
      snapshots: capture_all(paths.iter().map(PathBuf::as_path))?,
      changed: paths,
      git,
      dir,
      committed: false,
      tag_created: false,
      pushed: false,
    })
  }

  /// `tool_path` holds the bin dirs of levels released earlier in this run
  fn run_level(
    &self,
    plan: &mut ReleasePlan,
    level: &[String],
    tool_path: &[PathBuf],
    txns: &mut [RepoTxn],
  ) -> RailResult<()> {
    for txn in txns.iter_mut() {
      self.update_repo(plan, txn).map_err(|e| e.in_phase("update"))?;
    }

    for kind in [JobKind::Build, JobKind::Test] {
      let jobs = BuildRunner::jobs_for(&self.ctx.graph, level, &self.ctx.registry, kind)?;
      let results = self.runner.run_with_path(jobs, tool_path).map_err(|e| e.in_phase("build"))?;
      if let Some(err) = first_failure(results) {
        return Err(err.in_phase("build"));
      }
    }

    for txn in txns.iter_mut() {
      let version = &plan.repo(&txn.name)?.next_version;
      let message = format!("chore(release): v{}", version);
      let existing: Vec<PathBuf> = txn.changed.iter().filter(|p| p.exists()).cloned().collect();
      txn.git.add(&existing).map_err(|e| e.in_phase("tag"))?;
      txn.committed = txn.git.commit(&message).map_err(|e| e.in_phase("tag"))?.is_some();
      txn.git.create_tag(&txn.tag, &message).map_err(|e| e.in_phase("tag"))?;
      txn.tag_created = true;
    }

    for txn in txns.iter_mut() {
      let refs = ["HEAD", txn.tag.as_str()];
      txn.git.push(&txn.remote, &refs).map_err(|e| e.in_phase("push"))?;
      txn.pushed = true;
      info!(repo = %txn.name, tag = %txn.tag, "pushed");
    }

    if let Some(ci) = self.ci() {
      let results: Vec<RailResult<()>> = txns.par_iter().map(|txn| ci.wait_release(&txn.dir, &txn.tag)).collect();
      results
        .into_iter()
        .collect::<RailResult<Vec<()>>>()
        .map_err(|e| e.in_phase("ci"))?;
    }

    Ok(())
  }

  /// Point sibling dependencies at their new versions, bump the manifest
  /// version and make sure the changelog section exists.
  fn update_repo(&self, plan: &mut ReleasePlan, txn: &mut RepoTxn) -> RailResult<()> {
    let handler = self.ctx.handler_for(&txn.name)?;

    for dep in self.ctx.graph.dependencies_of(&txn.name)? {
      let Some(dep_plan) = plan.repos.get(&dep).filter(|r| r.released) else {
        continue;
      };
      let reference = self
        .ctx
        .graph
        .node(&dep)
        .and_then(|n| n.identity.clone())
        .unwrap_or_else(|| dep.clone());
      debug!(repo = %txn.name, dependency = %reference, version = %dep_plan.next_version, "updating dependency");
      handler.update_dependency(&txn.dir, &reference, &dep_plan.next_version)?;
    }

    let repo = plan.repo_mut(&txn.name)?;
    for path in handler.set_version(&txn.dir, &repo.next_version)? {
      if !txn.changed.contains(&path) {
        txn.changed.push(path);
      }
    }

    if repo.changelog_state == ChangelogState::None {
      plan.write_changelog(&self.ctx.config, &txn.name)?;
    }

    Ok(())
  }
}

/// Undo every unpushed repository of a failed level
fn rollback(txns: &[RepoTxn]) -> RollbackReport {
  let mut report = RollbackReport::new();

  for txn in txns {
    if txn.pushed {
      report.manual(format!(
        "{} was pushed to '{}' for '{}'; delete it remotely if the release must be withdrawn",
        txn.tag, txn.remote, txn.name
      ));
      continue;
    }

    if txn.tag_created {
      report.attempt(&format!("delete tag {} in '{}'", txn.tag, txn.name), txn.git.delete_tag(&txn.tag));
    }
    if txn.committed {
      report.attempt(
        &format!("reset '{}' to {}", txn.name, short(&txn.prev_head)),
        txn.git.reset_to(&txn.prev_head),
      );
    }
    report.restore_all(&txn.snapshots);
    report.attempt(
      &format!("unstage files in '{}'", txn.name),
      unstage(&txn.git, &txn.changed),
    );
  }

  if !report.is_clean() {
    warn!(warnings = report.warnings.len(), "release rollback incomplete");
  }
  report
}

fn unstage(git: &SystemGit, paths: &[PathBuf]) -> RailResult<()> {
  let tracked: Vec<PathBuf> = paths.iter().filter(|p| p.exists()).cloned().collect();
  if tracked.is_empty() {
    return Ok(());
  }
  git.reset_paths(&tracked)
}

fn short(sha: &str) -> &str {
  sha.get(..8).unwrap_or(sha)
}
