//! Shared cancellation signal
//!
//! A single `CancelToken` is the only synchronization primitive shared between
//! build workers and the CI wait loop. It fires at most once: the first caller
//! of [`CancelToken::cancel`] gets `true`, everyone after gets `false`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  fired: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Trip the token. Returns `true` only for the call that actually tripped it.
  pub fn cancel(&self) -> bool {
    self
      .fired
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub fn is_cancelled(&self) -> bool {
    self.fired.load(Ordering::Acquire)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;

  #[test]
  fn test_fires_once() {
    let token = CancelToken::new();
    assert!(!token.is_cancelled());
    assert!(token.cancel());
    assert!(!token.cancel());
    assert!(token.is_cancelled());
  }

  #[test]
  fn test_single_winner_across_threads() {
    let token = CancelToken::new();
    let winners: usize = thread::scope(|s| {
      let handles: Vec<_> = (0..16).map(|_| s.spawn(|| token.cancel())).collect();
      handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
    });
    assert_eq!(winners, 1);
  }
}
