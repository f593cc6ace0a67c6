//! Progress indicators for build runs
//!
//! Uses `linya` for allocation-free, concurrency-friendly progress bars: one
//! bar per dependency level, ticked as jobs finish.

use crate::build::{BuildEvent, JobStatus};
use linya::{Bar, Progress};
use std::sync::{Arc, Mutex, PoisonError};

/// One bar per build level, driven by [`BuildEvent`]s.
///
/// Clones share the same terminal area, so events may be fed from any thread.
#[derive(Clone)]
pub struct LevelProgress {
  inner: Arc<Mutex<Inner>>,
}

struct Inner {
  progress: Progress,
  current: Option<Bar>,
  failed: usize,
}

impl LevelProgress {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        progress: Progress::new(),
        current: None,
        failed: 0,
      })),
    }
  }

  pub fn handle(&self, event: &BuildEvent) {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    match event {
      BuildEvent::LevelStarted { level, jobs } => {
        let label = format!("level {} ({})", level, jobs.join(", "));
        let bar = inner.progress.bar(jobs.len(), label);
        inner.current = Some(bar);
      }
      BuildEvent::Finished { status, .. } => {
        if !matches!(status, JobStatus::Succeeded) {
          inner.failed += 1;
        }
        let Inner { progress, current, .. } = &mut *inner;
        if let Some(bar) = current {
          progress.inc_and_draw(bar, 1);
        }
      }
      BuildEvent::Started { .. } | BuildEvent::Output { .. } => {}
    }
  }

  /// Jobs that did not succeed so far
  pub fn failed(&self) -> usize {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner).failed
  }
}

impl Default for LevelProgress {
  fn default() -> Self {
    Self::new()
  }
}
