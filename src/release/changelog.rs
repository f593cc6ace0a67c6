//! Changelog sections: rendering, hashing and in-place writing

use super::plan::{CommitType, ReleaseCommit};
use crate::core::error::{RailResult, ResultExt};
use semver::Version;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::Path;

const TITLE: &str = "# Changelog";

/// Order sections appear in
const ORDERED_TYPES: [CommitType; 12] = [
  CommitType::Feat,
  CommitType::Fix,
  CommitType::Perf,
  CommitType::Docs,
  CommitType::Refactor,
  CommitType::Test,
  CommitType::Build,
  CommitType::Ci,
  CommitType::Chore,
  CommitType::Style,
  CommitType::Revert,
  CommitType::Other,
];

/// SHA-256 of `content`, lowercase hex
pub fn hash_content(content: &str) -> String {
  let digest = Sha256::digest(content.as_bytes());
  format!("{:x}", digest)
}

/// True when `line` mentions `version` as a whole token (`0.1.1` does not
/// match `0.1.10` or `10.1.1`)
fn mentions_version(line: &str, version: &str) -> bool {
  let boundary = |c: Option<char>| !c.is_some_and(|c| c.is_ascii_digit() || c == '.');
  line.match_indices(version).any(|(start, _)| {
    let before = line[..start].chars().next_back();
    let after = line[start + version.len()..].chars().next();
    boundary(before) && boundary(after)
  })
}

/// The section for `version`: from its `## ` header line up to (not
/// including) the next `## ` line, or EOF.
pub fn section_for<'a>(content: &'a str, version: &Version) -> Option<&'a str> {
  section_range(content, version).map(|range| &content[range])
}

fn section_range(content: &str, version: &Version) -> Option<Range<usize>> {
  let version = version.to_string();
  let mut start = None;
  let mut offset = 0;

  for line in content.split_inclusive('\n') {
    if line.starts_with("## ") {
      if let Some(begin) = start {
        return Some(begin..offset);
      }
      if mentions_version(line, &version) {
        start = Some(offset);
      }
    }
    offset += line.len();
  }

  start.map(|begin| begin..content.len())
}

/// Hash of the whole file as it is on disk (`None` when it does not exist).
///
/// The same hash is recorded by [`write_section`], so any edit anywhere in
/// the file shows up as a mismatch.
pub fn current_hash(path: &Path) -> RailResult<Option<String>> {
  if !path.exists() {
    return Ok(None);
  }
  let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
  Ok(Some(hash_content(&content)))
}

/// Group commits into `### <Type>` blocks
pub fn render_entry(commits: &[ReleaseCommit]) -> String {
  let mut by_type: BTreeMap<CommitType, Vec<&ReleaseCommit>> = BTreeMap::new();
  for commit in commits {
    by_type.entry(commit.commit_type).or_default().push(commit);
  }

  let mut output = String::new();
  for commit_type in &ORDERED_TYPES {
    let Some(commits) = by_type.get(commit_type) else {
      continue;
    };
    output.push_str(&format!("### {}\n\n", commit_type.display_name()));
    for commit in commits {
      let scope = commit.scope.as_ref().map(|s| format!("**{}**: ", s)).unwrap_or_default();
      output.push_str(&format!("- {}{}\n", scope, commit.description));
      if commit.is_breaking {
        output.push_str("  - **BREAKING CHANGE**\n");
      }
    }
    output.push('\n');
  }

  if output.is_empty() {
    output.push_str("- Dependency updates\n\n");
  }
  output
}

fn header(version: &Version, date: Option<&str>) -> String {
  match date {
    Some(date) => format!("## v{} - {}\n", version, date),
    None => format!("## v{}\n", version),
  }
}

/// Write (or replace) the `version` section and return the hash of the
/// resulting file.
///
/// A new section goes right after the `# ` title, which is created when the
/// file has none.
pub fn write_section(path: &Path, version: &Version, body: &str, date: Option<&str>) -> RailResult<String> {
  let existing = if path.exists() {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
  } else {
    String::new()
  };

  let mut section = header(version, date);
  section.push('\n');
  section.push_str(body.trim_end_matches('\n'));
  section.push('\n');

  let updated = match section_range(&existing, version) {
    Some(range) => {
      let mut replacement = section.clone();
      if range.end < existing.len() {
        replacement.push('\n');
      }
      format!("{}{}{}", &existing[..range.start], replacement, &existing[range.end..])
    }
    None => insert_after_title(&existing, &section),
  };

  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }
  fs::write(path, &updated).with_context(|| format!("Failed to write {}", path.display()))?;

  Ok(hash_content(&updated))
}

fn insert_after_title(existing: &str, section: &str) -> String {
  let (title, rest) = match existing.split_once('\n') {
    Some((first, rest)) if first.starts_with("# ") => (first.to_string(), rest.trim_start_matches('\n')),
    _ if existing.starts_with("# ") => (existing.trim_end().to_string(), ""),
    _ => (TITLE.to_string(), existing.trim_start_matches('\n')),
  };

  let mut out = format!("{}\n\n{}", title, section);
  if !rest.is_empty() {
    out.push('\n');
    out.push_str(rest);
  }
  out
}
