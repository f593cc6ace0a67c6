//! Tracing initialisation for the eco-rail binary.
//!
//! `RUST_LOG` always wins; otherwise the verbosity flag picks the default
//! filter. Safe to call more than once, only the first call takes effect.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber.
///
/// * `verbose` - default to `debug` for eco-rail instead of `warn`
/// * `json` - newline-delimited JSON log lines on stderr
pub fn init_tracing(verbose: bool, json: bool) {
  let default_filter = if verbose { "eco_rail=debug" } else { "eco_rail=warn" };
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

  if json {
    tracing_subscriber::registry()
      .with(env_filter)
      .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
      .try_init()
      .ok();
  } else {
    tracing_subscriber::registry()
      .with(env_filter)
      .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
      .try_init()
      .ok();
  }
}
