//! Changelog mutation tracking
//!
//! eco-rail remembers the hash of every changelog section it writes. Before
//! applying a release it re-hashes the section: a mismatch means someone
//! edited the generated text and the release must not silently overwrite it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangelogState {
  /// Nothing written yet
  #[default]
  None,
  /// On-disk section matches what was written
  Clean,
  /// Section changed (or disappeared) since it was written
  Dirty,
}

impl ChangelogState {
  /// Next state given the recorded hash and the hash of what is on disk now.
  ///
  /// Only `Clean` can move, and only to `Dirty`. Once dirty, a matching hash
  /// does not clean it again; that takes [`ChangelogState::record_write`].
  pub fn refresh(self, recorded: Option<&str>, current: Option<&str>) -> Self {
    match self {
      ChangelogState::Clean if recorded != current || current.is_none() => ChangelogState::Dirty,
      state => state,
    }
  }

  /// State after eco-rail (re)writes or accepts the section
  pub fn record_write(self) -> Self {
    ChangelogState::Clean
  }

  pub fn is_dirty(self) -> bool {
    self == ChangelogState::Dirty
  }
}

impl std::fmt::Display for ChangelogState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ChangelogState::None => write!(f, "none"),
      ChangelogState::Clean => write!(f, "clean"),
      ChangelogState::Dirty => write!(f, "dirty"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transitions() {
    assert_eq!(ChangelogState::None.refresh(None, Some("a")), ChangelogState::None);
    assert_eq!(ChangelogState::Clean.refresh(Some("a"), Some("a")), ChangelogState::Clean);
    assert_eq!(ChangelogState::Clean.refresh(Some("a"), Some("b")), ChangelogState::Dirty);
    assert_eq!(ChangelogState::Clean.refresh(Some("a"), None), ChangelogState::Dirty);
  }

  #[test]
  fn test_dirty_is_sticky_until_rewritten() {
    let state = ChangelogState::Dirty.refresh(Some("a"), Some("a"));
    assert!(state.is_dirty());
    assert_eq!(state.record_write(), ChangelogState::Clean);
  }

  #[test]
  fn test_serde_lowercase() {
    assert_eq!(serde_json::to_string(&ChangelogState::Dirty).unwrap(), "\"dirty\"");
  }
}
