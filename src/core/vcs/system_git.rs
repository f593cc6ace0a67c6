//! System git backend
//!
//! Every operation is one `git` subprocess with a curated environment. Output
//! that needs structure uses ASCII unit/record separators instead of parsing
//! human-oriented formats.

use super::CommitInfo;
use crate::core::error::{GitError, RailError, RailResult, ResultExt};
use semver::Version;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Environment variables passed through to git. Everything else is cleared.
const PASSTHROUGH_ENV: &[&str] = &[
  "PATH",
  "HOME",
  "SSH_AUTH_SOCK",
  "GIT_SSH_COMMAND",
  "GIT_ASKPASS",
  "XDG_CONFIG_HOME",
];

/// Git backend using system git
pub struct SystemGit {
  /// Repository working directory
  pub(crate) repo_path: PathBuf,

  /// Working tree root
  pub(crate) work_tree: PathBuf,
}

impl SystemGit {
  /// Open a git repository
  pub fn open(path: &Path) -> RailResult<Self> {
    let output = Command::new("git")
      .arg("-C")
      .arg(path)
      .args(["rev-parse", "--show-toplevel"])
      .output()
      .context("Failed to execute git rev-parse")?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      if stderr.contains("not a git repository") {
        return Err(RailError::Git(GitError::RepoNotFound {
          path: path.to_path_buf(),
        }));
      }
      return Err(RailError::message(format!("Failed to open git repository: {}", stderr)));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);

    Ok(Self {
      repo_path: path.to_path_buf(),
      work_tree: PathBuf::from(stdout.trim()),
    })
  }

  /// Initialize a new repository and open it
  pub fn init(path: &Path, branch: &str) -> RailResult<Self> {
    let output = Command::new("git")
      .arg("-C")
      .arg(path)
      .args(["init", "-q", &format!("--initial-branch={}", branch)])
      .output()
      .context("Failed to execute git init")?;
    check_status("git init", &output)?;
    Self::open(path)
  }

  pub fn work_tree(&self) -> &Path {
    &self.work_tree
  }

  /// Get HEAD commit SHA
  pub fn head_commit(&self) -> RailResult<String> {
    let output = self.run(&["rev-parse", "HEAD"])?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  /// Get current branch name ("HEAD" when detached)
  pub fn current_branch(&self) -> RailResult<String> {
    let output = self
      .git_cmd()
      .args(["rev-parse", "--abbrev-ref", "HEAD"])
      .output()
      .context("Failed to get current branch")?;

    if !output.status.success() {
      return Ok("HEAD".to_string());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  /// True when there are no staged, unstaged or untracked changes
  pub fn is_clean(&self) -> RailResult<bool> {
    let output = self.run(&["status", "--porcelain"])?;
    Ok(output.stdout.iter().all(|b| b.is_ascii_whitespace()))
  }

  /// Paths with staged, unstaged or untracked changes, relative to the work tree
  pub fn changed_paths(&self) -> RailResult<Vec<PathBuf>> {
    let output = self.run(&["status", "--porcelain", "--untracked-files=all"])?;
    Ok(parse_porcelain(&String::from_utf8_lossy(&output.stdout)))
  }

  /// All tags of the form `<prefix>X.Y.Z`, highest version first
  pub fn version_tags(&self, prefix: &str) -> RailResult<Vec<(Version, String)>> {
    let pattern = format!("{}*", prefix);
    let output = self.run(&["tag", "--list", &pattern])?;

    let mut tags: Vec<(Version, String)> = String::from_utf8_lossy(&output.stdout)
      .lines()
      .map(str::trim)
      .filter_map(|tag| {
        let version = Version::parse(tag.strip_prefix(prefix)?).ok()?;
        Some((version, tag.to_string()))
      })
      .collect();

    tags.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(tags)
  }

  /// Highest released version and its tag, if any
  pub fn latest_version(&self, prefix: &str) -> RailResult<Option<(Version, String)>> {
    Ok(self.version_tags(prefix)?.into_iter().next())
  }

  /// Commits reachable from HEAD but not from `since` (all commits when `None`),
  /// newest first
  pub fn commits_since(&self, since: Option<&str>) -> RailResult<Vec<CommitInfo>> {
    if !self.has_commits()? {
      return Ok(Vec::new());
    }

    let range = match since {
      Some(rev) => format!("{}..HEAD", rev),
      None => "HEAD".to_string(),
    };
    let format = format!("--format=%H{f}%s{f}%b{r}", f = "%x1f", r = "%x1e");
    let output = self.run(&["log", "--no-merges", &format, &range])?;

    Ok(parse_log(&String::from_utf8_lossy(&output.stdout)))
  }

  fn has_commits(&self) -> RailResult<bool> {
    let output = self
      .git_cmd()
      .args(["rev-parse", "--verify", "-q", "HEAD"])
      .output()
      .context("Failed to run git rev-parse")?;
    Ok(output.status.success())
  }

  pub fn add(&self, paths: &[PathBuf]) -> RailResult<()> {
    let mut cmd = self.git_cmd();
    cmd.arg("add").arg("--");
    for path in paths {
      cmd.arg(path);
    }
    let output = cmd.output().context("Failed to run git add")?;
    check_status("git add", &output)
  }

  /// Commit staged changes; no-op when nothing is staged
  pub fn commit(&self, message: &str) -> RailResult<Option<String>> {
    let staged = self
      .git_cmd()
      .args(["diff", "--cached", "--quiet"])
      .status()
      .context("Failed to run git diff")?;
    if staged.success() {
      return Ok(None);
    }

    self.run(&["commit", "-q", "-m", message])?;
    Ok(Some(self.head_commit()?))
  }

  /// Create an annotated tag at HEAD
  pub fn create_tag(&self, tag: &str, message: &str) -> RailResult<()> {
    self.run(&["tag", "-a", tag, "-m", message])?;
    Ok(())
  }

  pub fn delete_tag(&self, tag: &str) -> RailResult<()> {
    self.run(&["tag", "-d", tag])?;
    Ok(())
  }

  pub fn tag_exists(&self, tag: &str) -> RailResult<bool> {
    let output = self
      .git_cmd()
      .args(["rev-parse", "-q", "--verify", &format!("refs/tags/{}", tag)])
      .output()
      .context("Failed to run git rev-parse")?;
    Ok(output.status.success())
  }

  /// Push refs (branches or tags) to a remote
  pub fn push(&self, remote: &str, refs: &[&str]) -> RailResult<()> {
    let mut cmd = self.git_cmd();
    cmd.args(["push", "-q", remote]);
    cmd.args(refs);
    debug!(repo = %self.work_tree.display(), remote, ?refs, "git push");

    let output = cmd.output().context("Failed to run git push")?;
    if !output.status.success() {
      return Err(RailError::Git(GitError::PushFailed {
        remote: remote.to_string(),
        refname: refs.join(" "),
        reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      }));
    }
    Ok(())
  }

  /// Unstage paths from the index, keeping working tree contents
  pub fn reset_paths(&self, paths: &[PathBuf]) -> RailResult<()> {
    let mut cmd = self.git_cmd();
    cmd.args(["reset", "-q", "--"]);
    for path in paths {
      cmd.arg(path);
    }
    let output = cmd.output().context("Failed to run git reset")?;
    check_status("git reset", &output)
  }

  /// Move HEAD (and the index) back to `rev`, keeping working tree contents
  pub fn reset_to(&self, rev: &str) -> RailResult<()> {
    self.run(&["reset", "-q", "--mixed", rev])?;
    Ok(())
  }

  fn run(&self, args: &[&str]) -> RailResult<Output> {
    let output = self
      .git_cmd()
      .args(args)
      .output()
      .with_context(|| format!("Failed to run git {}", args.join(" ")))?;
    check_status(&format!("git {}", args.join(" ")), &output)?;
    Ok(output)
  }

  /// Create a git command with a curated environment
  ///
  /// - Sets working directory to repo path
  /// - Clears environment variables except credentials/path plumbing
  /// - Adds safe configuration overrides
  pub(crate) fn git_cmd(&self) -> Command {
    let mut cmd = Command::new("git");

    cmd.arg("-C").arg(&self.repo_path);

    cmd.env_clear();
    for key in PASSTHROUGH_ENV {
      if let Ok(value) = std::env::var(key) {
        cmd.env(key, value);
      }
    }

    cmd.arg("-c").arg("advice.detachedHead=false");
    cmd.arg("-c").arg("core.quotePath=false");

    cmd
  }
}

fn check_status(command: &str, output: &Output) -> RailResult<()> {
  if output.status.success() {
    return Ok(());
  }
  Err(RailError::Git(GitError::CommandFailed {
    command: command.to_string(),
    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
  }))
}

fn parse_porcelain(raw: &str) -> Vec<PathBuf> {
  raw
    .lines()
    .filter_map(|line| {
      let path = line.get(3..)?;
      // renames are reported as `old -> new`
      let path = path.rsplit_once(" -> ").map_or(path, |(_, new)| new);
      let path = path.trim().trim_matches('"');
      (!path.is_empty()).then(|| PathBuf::from(path))
    })
    .collect()
}

fn parse_log(raw: &str) -> Vec<CommitInfo> {
  raw
    .split(RECORD_SEP)
    .filter_map(|record| {
      let record = record.trim_start_matches('\n');
      if record.trim().is_empty() {
        return None;
      }
      let mut fields = record.splitn(3, FIELD_SEP);
      let sha = fields.next()?.trim().to_string();
      let subject = fields.next()?.trim().to_string();
      let body = fields.next().unwrap_or("").trim().to_string();
      Some(CommitInfo { sha, subject, body })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_porcelain() {
    let raw = " M CHANGELOG.md\n?? notes/new file.txt\nR  old.go -> new.go\n";
    assert_eq!(
      parse_porcelain(raw),
      vec![
        PathBuf::from("CHANGELOG.md"),
        PathBuf::from("notes/new file.txt"),
        PathBuf::from("new.go")
      ]
    );
  }

  #[test]
  fn test_parse_log_multiline_bodies() {
    let raw = format!(
      "aaa{f}feat: one{f}line 1\nline 2{r}\nbbb{f}fix: two{f}{r}\n",
      f = FIELD_SEP,
      r = RECORD_SEP
    );
    let commits = parse_log(&raw);
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].sha, "aaa");
    assert_eq!(commits[0].subject, "feat: one");
    assert_eq!(commits[0].body, "line 1\nline 2");
    assert_eq!(commits[1].subject, "fix: two");
    assert!(commits[1].body.is_empty());
  }

  #[test]
  fn test_parse_log_empty() {
    assert!(parse_log("").is_empty());
    assert!(parse_log("\n").is_empty());
  }
}
