//! Tracing subscriber setup for the binary.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "svcache=info";

const LOG_FILE: &str = "svcache.log";

/// Where log output goes.
#[derive(Debug, Clone)]
pub enum LogTarget {
  Stderr,
  /// Append to `svcache.log` in this directory
  Directory(PathBuf),
}

impl LogTarget {
  /// `$XDG_DATA_HOME/svcache`, or stderr when no data directory is known.
  pub fn default_for_platform() -> Self {
    dirs::data_dir()
      .map(|dir| LogTarget::Directory(dir.join("svcache")))
      .unwrap_or(LogTarget::Stderr)
  }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the process.
pub fn init(target: LogTarget) -> Option<WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  let dir = match target {
    LogTarget::Directory(dir) if std::fs::create_dir_all(&dir).is_ok() => dir,
    _ => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .ok();
      return None;
    }
  };

  let appender = tracing_appender::rolling::never(dir, LOG_FILE);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .ok();

  Some(guard)
}
