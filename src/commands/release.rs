//! Release commands: plan, status, changelog review, apply and CI wait

use crate::build::BuildRunner;
use crate::ci::{GhCli, WaitProtocol};
use crate::core::cancel::CancelToken;
use crate::core::context::EcosystemContext;
use crate::core::error::{ConfigError, RailError, RailResult};
use crate::core::vcs::SystemGit;
use crate::release::{ApplyOptions, ChangelogState, ReleaseExecutor, ReleasePlan, RepoReleasePlan, VersionBump};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Parse `--bump` values: `name=level` for one workspace, a bare level for all
fn parse_overrides(ctx: &EcosystemContext, bumps: &[String]) -> RailResult<BTreeMap<String, VersionBump>> {
  let mut overrides = BTreeMap::new();
  for raw in bumps {
    match raw.split_once('=') {
      Some((name, level)) => {
        if !ctx.graph.contains(name) {
          return Err(RailError::Config(ConfigError::WorkspaceNotFound { name: name.to_string() }));
        }
        let bump = level.parse::<VersionBump>().map_err(RailError::message)?;
        overrides.insert(name.to_string(), bump);
      }
      None => {
        let bump = raw.parse::<VersionBump>().map_err(RailError::message)?;
        for name in ctx.graph.names() {
          overrides.entry(name).or_insert(bump);
        }
      }
    }
  }
  Ok(overrides)
}

/// Analyze every workspace, write changelog sections and save the plan
pub fn run_release_plan(ctx: &EcosystemContext, bumps: &[String], json: bool) -> RailResult<()> {
  let overrides = parse_overrides(ctx, bumps)?;
  let mut plan = ReleasePlan::build(&ctx.root, &ctx.config, &ctx.graph, &overrides)?;

  let mut kept = Vec::new();
  if ReleasePlan::path(&ctx.root).exists() {
    let mut previous = ReleasePlan::load(&ctx.root)?;
    previous.refresh_changelogs(&ctx.config)?;
    kept = plan.keep_edited_changelogs(&previous);
  }
  plan.write_pending_changelogs(&ctx.config)?;
  plan.save()?;

  for name in &kept {
    warn!(repo = %name, "changelog was edited, keeping it");
    eprintln!(
      "⚠️  Kept edited changelog of '{}'; run `eco-rail release changelog {} [--accept]` to resolve",
      name, name
    );
  }

  if json {
    println!("{}", serde_json::to_string_pretty(&plan)?);
    return Ok(());
  }

  print_plan(&plan);
  if !plan.pending().is_empty() {
    println!("📝 Changelog sections written. Review them, then run `eco-rail release apply`.");
  }
  Ok(())
}

/// Re-check changelog hashes against the saved plan
pub fn run_release_status(ctx: &EcosystemContext, json: bool) -> RailResult<()> {
  let mut plan = ReleasePlan::load(&ctx.root)?;
  plan.refresh_changelogs(&ctx.config)?;
  plan.save()?;

  if json {
    println!("{}", serde_json::to_string_pretty(&plan)?);
    return Ok(());
  }

  print_plan(&plan);
  let dirty: Vec<&String> = plan
    .repos
    .iter()
    .filter(|(_, r)| r.is_pending() && r.changelog_state.is_dirty())
    .map(|(name, _)| name)
    .collect();
  if !dirty.is_empty() {
    println!("⚠️  Edited changelogs block the release until accepted or regenerated:");
    for name in dirty {
      println!("   eco-rail release changelog {} --accept", name);
    }
  }
  Ok(())
}

/// Regenerate one changelog section, or accept its edited content
pub fn run_release_changelog(ctx: &EcosystemContext, repo: &str, accept: bool) -> RailResult<()> {
  let mut plan = ReleasePlan::load(&ctx.root)?;
  if !plan.repo(repo)?.is_pending() {
    return Err(RailError::message(format!("'{}' has nothing to release", repo)));
  }

  if accept {
    plan.accept_changelog(&ctx.config, repo)?;
    println!("✅ Accepted changelog for '{}'", repo);
  } else {
    let path = plan.write_changelog(&ctx.config, repo)?;
    println!("📝 Regenerated {}", path.display());
  }

  plan.save()
}

/// Release every pending workspace, dependencies first
pub fn run_release_apply(ctx: &EcosystemContext, dry_run: bool, skip_ci: bool, jobs: Option<usize>) -> RailResult<()> {
  let mut plan = ReleasePlan::load(&ctx.root)?;
  if plan.pending().is_empty() {
    println!("⚠️  Nothing to release");
    return Ok(());
  }

  let cancel = CancelToken::new();
  let runner = BuildRunner::new(jobs.or(ctx.config.build.workers)).with_cancel_token(cancel.clone());
  let ci = ctx
    .config
    .ci
    .enabled
    .then(|| WaitProtocol::new(Arc::new(GhCli::new()), &ctx.config.ci).with_cancel_token(cancel));

  let options = ApplyOptions { dry_run, skip_ci };
  let report = ReleaseExecutor::new(ctx, runner, ci, options).apply(&mut plan)?;

  if dry_run {
    println!("🔍 Dry-run mode (no changes applied)");
    println!();
    for (index, level) in report.levels.iter().enumerate() {
      let entries: Vec<String> = level
        .iter()
        .filter_map(|name| plan.repos.get(name).map(|r| format!("{} v{}", name, r.next_version)))
        .collect();
      println!("  Level {}: {}", index, entries.join(", "));
    }
    return Ok(());
  }

  println!();
  for released in &report.released {
    println!("  🏷️  {} {}", released.name, released.tag);
  }
  println!();
  println!("✅ Released {} workspace(s)", report.released.len());
  Ok(())
}

/// Run both CI wait phases for one workspace
pub fn run_release_wait(ctx: &EcosystemContext, repo: &str, tag: Option<String>) -> RailResult<()> {
  let dir = ctx.workspace(repo)?.dir(&ctx.root);
  let tag = match tag {
    Some(tag) => tag,
    None => SystemGit::open(&dir)?
      .latest_version(&ctx.config.ecosystem.tag_prefix)?
      .map(|(_, tag)| tag)
      .ok_or_else(|| RailError::with_help(format!("'{}' has no release tags", repo), "Pass the tag with --tag."))?,
  };

  println!("⏳ Waiting for CI of {} {}", repo, tag);
  WaitProtocol::new(Arc::new(GhCli::new()), &ctx.config.ci).wait(&dir, &tag)?;
  println!("✅ CI green for {} {}", repo, tag);
  Ok(())
}

fn print_plan(plan: &ReleasePlan) {
  println!("📦 Release plan ({})", plan.created_at.format("%Y-%m-%d %H:%M UTC"));
  println!();

  let (pending, idle): (Vec<_>, Vec<_>) = plan.repos.iter().partition(|(_, r)| r.is_pending() || r.released);
  for (name, repo) in &pending {
    println!("  {}", describe(name, repo));
    for commit in &repo.commits {
      let breaking = if commit.is_breaking { " [BREAKING]" } else { "" };
      println!("      {}: {}{}", commit.commit_type.display_name(), commit.description, breaking);
    }
  }

  if !idle.is_empty() {
    let names: Vec<&str> = idle.iter().map(|(name, _)| name.as_str()).collect();
    println!();
    println!("  Unchanged: {}", names.join(", "));
  }
  println!();
}

fn describe(name: &str, repo: &RepoReleasePlan) -> String {
  let marker = if repo.released { "🏷️ " } else { "📦" };
  let reason = if repo.dependency_bump { ", dependency update" } else { "" };
  let changelog = match repo.changelog_state {
    ChangelogState::None => "not written",
    ChangelogState::Clean => "clean",
    ChangelogState::Dirty => "edited",
  };
  format!(
    "{} {} {} -> {} ({}{}; changelog {})",
    marker, name, repo.current_version, repo.next_version, repo.selected_bump, reason, changelog
  )
}
