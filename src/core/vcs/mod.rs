pub mod system_git;

pub use system_git::SystemGit;

/// Information about a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
  pub sha: String,
  pub subject: String,
  pub body: String,
}

impl CommitInfo {
  /// Subject and body joined the way `git log --format=%B` shows them
  pub fn message(&self) -> String {
    if self.body.is_empty() {
      self.subject.clone()
    } else {
      format!("{}\n\n{}", self.subject, self.body)
    }
  }
}
