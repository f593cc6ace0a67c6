//! Release planning: analyze commits since the last tag and pick version bumps
//!
//! The plan is persisted to `.rail/release-plan.json` so that changelog review,
//! status checks and the final apply all work from the same decisions.

use super::changelog;
use super::state::ChangelogState;
use crate::core::config::RailConfig;
use crate::core::error::{RailError, RailResult, ResultExt};
use crate::core::vcs::{CommitInfo, SystemGit};
use crate::graph::{EcosystemGraph, topological_levels};
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Plan file location, relative to the ecosystem root
pub const PLAN_PATH: &str = ".rail/release-plan.json";

/// Version bump type based on conventional commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionBump {
  /// No bump needed (no relevant changes)
  None,
  /// Patch version bump (bug fixes)
  Patch,
  /// Minor version bump (new features)
  Minor,
  /// Major version bump (breaking changes)
  Major,
}

impl VersionBump {
  /// Apply bump to a semver version
  pub fn apply(&self, version: &Version) -> Version {
    match self {
      VersionBump::Major => Version::new(version.major + 1, 0, 0),
      VersionBump::Minor => Version::new(version.major, version.minor + 1, 0),
      VersionBump::Patch => Version::new(version.major, version.minor, version.patch + 1),
      VersionBump::None => version.clone(),
    }
  }
}

impl fmt::Display for VersionBump {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      VersionBump::Major => "major",
      VersionBump::Minor => "minor",
      VersionBump::Patch => "patch",
      VersionBump::None => "none",
    };
    write!(f, "{}", s)
  }
}

impl FromStr for VersionBump {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "major" => Ok(VersionBump::Major),
      "minor" => Ok(VersionBump::Minor),
      "patch" => Ok(VersionBump::Patch),
      "none" => Ok(VersionBump::None),
      other => Err(format!("unknown bump '{}' (expected major, minor, patch or none)", other)),
    }
  }
}

/// Conventional commit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitType {
  Feat,
  Fix,
  Perf,
  Docs,
  Refactor,
  Test,
  Build,
  Ci,
  Chore,
  Style,
  Revert,
  Other,
}

impl CommitType {
  fn from_keyword(s: &str) -> Self {
    match s.to_ascii_lowercase().as_str() {
      "feat" | "feature" => Self::Feat,
      "fix" => Self::Fix,
      "perf" | "performance" => Self::Perf,
      "docs" | "doc" => Self::Docs,
      "refactor" => Self::Refactor,
      "test" | "tests" => Self::Test,
      "build" => Self::Build,
      "ci" => Self::Ci,
      "chore" => Self::Chore,
      "style" => Self::Style,
      "revert" => Self::Revert,
      _ => Self::Other,
    }
  }

  /// Section heading used in changelogs
  pub fn display_name(&self) -> &'static str {
    match self {
      Self::Feat => "Features",
      Self::Fix => "Bug Fixes",
      Self::Perf => "Performance",
      Self::Docs => "Documentation",
      Self::Refactor => "Refactoring",
      Self::Test => "Tests",
      Self::Build => "Build",
      Self::Ci => "CI",
      Self::Chore => "Chores",
      Self::Style => "Style",
      Self::Revert => "Reverts",
      Self::Other => "Other",
    }
  }
}

/// A single commit relevant to the release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseCommit {
  pub sha: String,
  pub commit_type: CommitType,
  pub scope: Option<String>,
  pub description: String,
  pub is_breaking: bool,
}

impl ReleaseCommit {
  /// Classify a commit by its conventional-commit header.
  ///
  /// Non-conventional messages become [`CommitType::Other`] with the subject
  /// as description. `type!:` or a `BREAKING CHANGE` footer marks breaking.
  pub fn parse(commit: &CommitInfo) -> Self {
    let subject = commit.subject.trim();
    let breaking_footer = commit
      .body
      .lines()
      .any(|line| line.starts_with("BREAKING CHANGE") || line.starts_with("BREAKING-CHANGE"));

    let parsed = subject.split_once(':').and_then(|(head, description)| {
      let (head, bang) = match head.strip_suffix('!') {
        Some(h) => (h, true),
        None => (head, false),
      };
      let (keyword, scope) = match head.split_once('(') {
        Some((keyword, rest)) => (keyword, Some(rest.strip_suffix(')')?.to_string())),
        None => (head, None),
      };
      if keyword.is_empty() || !keyword.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
      }
      Some((CommitType::from_keyword(keyword), scope, description.trim().to_string(), bang))
    });

    match parsed {
      Some((commit_type, scope, description, bang)) => Self {
        sha: commit.sha.clone(),
        commit_type,
        scope,
        description,
        is_breaking: bang || breaking_footer,
      },
      None => Self {
        sha: commit.sha.clone(),
        commit_type: CommitType::Other,
        scope: None,
        description: subject.to_string(),
        is_breaking: breaking_footer,
      },
    }
  }
}

/// Determine version bump from commits
pub fn determine_bump(commits: &[ReleaseCommit]) -> VersionBump {
  if commits.is_empty() {
    return VersionBump::None;
  }
  if commits.iter().any(|c| c.is_breaking) {
    return VersionBump::Major;
  }
  if commits.iter().any(|c| c.commit_type == CommitType::Feat) {
    return VersionBump::Minor;
  }
  // fixes, perf and everything else
  VersionBump::Patch
}

/// Release decision for one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoReleasePlan {
  pub current_version: Version,
  pub next_version: Version,
  /// Bump derived from commits
  pub detected_bump: VersionBump,
  /// Bump in effect (detected, raised by a dependency release, or overridden)
  pub selected_bump: VersionBump,
  /// Tag the commit range starts from (`None` for a first release)
  pub previous_tag: Option<String>,
  pub commits: Vec<ReleaseCommit>,
  /// Released only because a dependency is released
  #[serde(default)]
  pub dependency_bump: bool,
  /// SHA-256 of the changelog section as last written by eco-rail
  pub changelog_hash: Option<String>,
  pub changelog_state: ChangelogState,
  /// Set once the tag is pushed
  #[serde(default)]
  pub released: bool,
}

impl RepoReleasePlan {
  /// Analyze a repository: highest `<prefix>X.Y.Z` tag, commits since it, bump
  pub fn analyze(git: &SystemGit, tag_prefix: &str) -> RailResult<Self> {
    let latest = git.latest_version(tag_prefix)?;
    let (current_version, previous_tag) = match latest {
      Some((version, tag)) => (version, Some(tag)),
      None => (Version::new(0, 0, 0), None),
    };

    let commits: Vec<ReleaseCommit> = git
      .commits_since(previous_tag.as_deref())?
      .iter()
      .map(ReleaseCommit::parse)
      .collect();
    let detected_bump = determine_bump(&commits);

    debug!(
      repo = %git.work_tree().display(),
      %current_version,
      commits = commits.len(),
      bump = %detected_bump,
      "analyzed repository"
    );

    Ok(Self {
      next_version: detected_bump.apply(&current_version),
      current_version,
      detected_bump,
      selected_bump: detected_bump,
      previous_tag,
      commits,
      dependency_bump: false,
      changelog_hash: None,
      changelog_state: ChangelogState::None,
      released: false,
    })
  }

  /// Override the bump, recomputing the next version
  pub fn select_bump(&mut self, bump: VersionBump) {
    self.selected_bump = bump;
    self.next_version = bump.apply(&self.current_version);
  }

  pub fn is_pending(&self) -> bool {
    self.selected_bump != VersionBump::None && !self.released
  }

  pub fn next_tag(&self, tag_prefix: &str) -> String {
    format!("{}{}", tag_prefix, self.next_version)
  }
}

/// Release plan for the whole ecosystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasePlan {
  pub root_dir: PathBuf,
  pub created_at: DateTime<Utc>,
  pub repos: BTreeMap<String, RepoReleasePlan>,
}

impl ReleasePlan {
  /// Analyze every workspace in the graph.
  ///
  /// A workspace without changes of its own still gets a patch release when
  /// any of its dependencies is released, so dependents pick up new versions.
  pub fn build(
    root: &Path,
    config: &RailConfig,
    graph: &EcosystemGraph,
    overrides: &BTreeMap<String, VersionBump>,
  ) -> RailResult<Self> {
    let mut repos = BTreeMap::new();
    for name in graph.names() {
      let Some(node) = graph.node(&name) else { continue };
      let git = SystemGit::open(&node.dir).with_context(|| format!("Workspace '{}' is not a git repository", name))?;
      let mut repo = RepoReleasePlan::analyze(&git, &config.ecosystem.tag_prefix)?;
      if let Some(bump) = overrides.get(&name) {
        repo.select_bump(*bump);
      }
      repos.insert(name, repo);
    }

    for level in topological_levels(graph, None)? {
      for name in level {
        let raised = graph
          .dependencies_of(&name)?
          .iter()
          .any(|dep| repos.get(dep).is_some_and(|r: &RepoReleasePlan| r.selected_bump != VersionBump::None));
        if let Some(repo) = repos.get_mut(&name)
          && raised
          && repo.selected_bump == VersionBump::None
          && !overrides.contains_key(&name)
        {
          repo.select_bump(VersionBump::Patch);
          repo.dependency_bump = true;
        }
      }
    }

    Ok(Self {
      root_dir: root.to_path_buf(),
      created_at: Utc::now(),
      repos,
    })
  }

  pub fn path(root: &Path) -> PathBuf {
    root.join(PLAN_PATH)
  }

  pub fn load(root: &Path) -> RailResult<Self> {
    let path = Self::path(root);
    if !path.exists() {
      return Err(RailError::with_help(
        format!("No release plan at {}", path.display()),
        "Run `eco-rail release plan` first.",
      ));
    }
    let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
  }

  pub fn save(&self) -> RailResult<()> {
    let path = Self::path(&self.root_dir);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut json = serde_json::to_string_pretty(self)?;
    json.push('\n');
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "saved release plan");
    Ok(())
  }

  /// Repos still to release, in name order
  pub fn pending(&self) -> Vec<String> {
    self
      .repos
      .iter()
      .filter(|(_, r)| r.is_pending())
      .map(|(name, _)| name.clone())
      .collect()
  }

  pub fn repo(&self, name: &str) -> RailResult<&RepoReleasePlan> {
    self
      .repos
      .get(name)
      .ok_or_else(|| RailError::message(format!("'{}' is not part of the release plan", name)))
  }

  pub fn repo_mut(&mut self, name: &str) -> RailResult<&mut RepoReleasePlan> {
    self
      .repos
      .get_mut(name)
      .ok_or_else(|| RailError::message(format!("'{}' is not part of the release plan", name)))
  }

  /// Carry edited changelogs over from `previous` so a re-plan does not
  /// overwrite them. Returns the names kept dirty; only `release changelog`
  /// regenerates or accepts them.
  pub fn keep_edited_changelogs(&mut self, previous: &ReleasePlan) -> Vec<String> {
    let mut kept = Vec::new();
    for (name, repo) in self.repos.iter_mut() {
      let Some(old) = previous.repos.get(name).filter(|r| r.changelog_state.is_dirty()) else {
        continue;
      };
      if !repo.is_pending() {
        continue;
      }
      repo.changelog_hash = old.changelog_hash.clone();
      repo.changelog_state = ChangelogState::Dirty;
      kept.push(name.clone());
    }
    kept
  }

  /// Write the changelog of every pending repository that is not dirty
  pub fn write_pending_changelogs(&mut self, config: &RailConfig) -> RailResult<()> {
    for name in self.pending() {
      if self.repo(&name)?.changelog_state.is_dirty() {
        continue;
      }
      self.write_changelog(config, &name)?;
    }
    Ok(())
  }

  /// Render and write `name`'s changelog section, recording it as clean
  pub fn write_changelog(&mut self, config: &RailConfig, name: &str) -> RailResult<PathBuf> {
    let path = config.workspace(name)?.changelog_path(&self.root_dir);
    let repo = self.repo_mut(name)?;
    let date = Utc::now().format("%Y-%m-%d").to_string();
    let hash = changelog::write_section(
      &path,
      &repo.next_version,
      &changelog::render_entry(&repo.commits),
      Some(&date),
    )?;
    repo.changelog_hash = Some(hash);
    repo.changelog_state = repo.changelog_state.record_write();
    Ok(path)
  }

  /// Take the changelog as it is now on disk as the reviewed version
  pub fn accept_changelog(&mut self, config: &RailConfig, name: &str) -> RailResult<()> {
    let path = config.workspace(name)?.changelog_path(&self.root_dir);
    let repo = self.repo_mut(name)?;
    let content = if path.exists() {
      fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
      String::new()
    };
    if changelog::section_for(&content, &repo.next_version).is_none() {
      return Err(RailError::with_help(
        format!("{} has no section for v{}", path.display(), repo.next_version),
        format!("Run `eco-rail release changelog {}` to generate it.", name),
      ));
    }
    repo.changelog_hash = Some(changelog::hash_content(&content));
    repo.changelog_state = repo.changelog_state.record_write();
    Ok(())
  }

  /// Re-hash every written changelog and advance its state
  pub fn refresh_changelogs(&mut self, config: &RailConfig) -> RailResult<()> {
    for (name, repo) in self.repos.iter_mut() {
      let Ok(ws) = config.workspace(name) else {
        continue;
      };
      let path = ws.changelog_path(&self.root_dir);
      let current = changelog::current_hash(&path)?;
      let next = repo
        .changelog_state
        .refresh(repo.changelog_hash.as_deref(), current.as_deref());
      if next != repo.changelog_state {
        debug!(repo = %name, from = ?repo.changelog_state, to = ?next, "changelog state changed");
      }
      repo.changelog_state = next;
    }
    Ok(())
  }
}
