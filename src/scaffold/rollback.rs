//! Byte-exact file snapshots and rollback bookkeeping

use crate::core::error::{RailResult, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Contents of a file before a run touched it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
  pub path: PathBuf,
  /// `None` when the file did not exist (restore deletes it)
  pub bytes: Option<Vec<u8>>,
}

impl FileSnapshot {
  pub fn capture(path: &Path) -> RailResult<Self> {
    let bytes = if path.exists() {
      Some(fs::read(path).with_context(|| format!("Failed to snapshot {}", path.display()))?)
    } else {
      None
    };
    Ok(Self {
      path: path.to_path_buf(),
      bytes,
    })
  }

  /// Put the file back exactly as captured
  pub fn restore(&self) -> RailResult<()> {
    match &self.bytes {
      Some(bytes) => {
        if let Some(parent) = self.path.parent() {
          fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, bytes).with_context(|| format!("Failed to restore {}", self.path.display()))
      }
      None if self.path.exists() => {
        fs::remove_file(&self.path).with_context(|| format!("Failed to remove {}", self.path.display()))
      }
      None => Ok(()),
    }
  }
}

/// Capture every path, failing on the first unreadable one
pub fn capture_all<'a, I>(paths: I) -> RailResult<Vec<FileSnapshot>>
where
  I: IntoIterator<Item = &'a Path>,
{
  paths.into_iter().map(FileSnapshot::capture).collect()
}

/// Problems met while undoing a run. Rollback never stops at the first one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackReport {
  pub warnings: Vec<String>,
  /// Steps that cannot be undone locally (e.g. a created remote repository)
  pub manual_steps: Vec<String>,
}

impl RollbackReport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_clean(&self) -> bool {
    self.warnings.is_empty()
  }

  /// Record the error of a best-effort step
  pub fn attempt(&mut self, what: &str, result: RailResult<()>) {
    if let Err(e) = result {
      self.warnings.push(format!("{}: {}", what, e));
    }
  }

  pub fn manual(&mut self, step: impl Into<String>) {
    self.manual_steps.push(step.into());
  }

  /// Restore snapshots in reverse capture order
  pub fn restore_all(&mut self, snapshots: &[FileSnapshot]) {
    for snapshot in snapshots.iter().rev() {
      let what = format!("restore {}", snapshot.path.display());
      self.attempt(&what, snapshot.restore());
    }
  }

  pub fn log(&self) {
    for warning in &self.warnings {
      warn!("rollback: {}", warning);
    }
    for step in &self.manual_steps {
      warn!("manual cleanup required: {}", step);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_restore_is_byte_exact() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rail.toml");
    let original = b"# keep me\n[ecosystem]\nowner = \"acme\"  \n\n".to_vec();
    fs::write(&path, &original).unwrap();

    let snapshot = FileSnapshot::capture(&path).unwrap();
    fs::write(&path, "changed").unwrap();
    snapshot.restore().unwrap();

    assert_eq!(fs::read(&path).unwrap(), original);
  }

  #[test]
  fn test_absent_file_is_deleted_on_restore() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("go.work");

    let snapshot = FileSnapshot::capture(&path).unwrap();
    assert_eq!(snapshot.bytes, None);
    fs::write(&path, "go 1.22\n").unwrap();
    snapshot.restore().unwrap();

    assert!(!path.exists());
    snapshot.restore().unwrap();
  }

  #[test]
  fn test_report_collects_failures() {
    let mut report = RollbackReport::new();
    report.attempt("ok step", Ok(()));
    report.attempt("bad step", Err(crate::core::error::RailError::message("boom")));
    report.manual("delete remote acme/tool");

    assert!(!report.is_clean());
    assert_eq!(report.warnings, vec!["bad step: boom".to_string()]);
    assert_eq!(report.manual_steps.len(), 1);
  }
}
