//! Registry logging: a daily rolling file under `<base>/logs`, optionally
//! mirrored to stderr. Config problems found before the subscriber existed
//! are replayed as warnings right after it is installed.

use crate::config::Config;
use crate::paths;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
  FileOnly,
  FileAndStderr,
}

pub fn init(base: &Path, cfg: &Config, output: Output) -> anyhow::Result<()> {
  let log_dir = paths::logs_dir(base);
  fs::create_dir_all(&log_dir)?;
  let removed = cleanup_old_logs(&log_dir, cfg.logging.retention_days);

  let file_appender = tracing_appender::rolling::daily(&log_dir, paths::LOG_FILE_NAME);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
  let _ = FILE_GUARD.set(guard);

  let directive = filter_directive(
    std::env::var(paths::LOG_LEVEL_ENV).ok().as_deref(),
    &cfg.logging.level,
  );
  let filter = tracing_subscriber::EnvFilter::try_new(&directive)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  let file_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(file_writer)
    .with_target(true);

  let stderr_layer = (output == Output::FileAndStderr).then(|| {
    tracing_subscriber::fmt::layer()
      .with_ansi(false)
      .with_writer(std::io::stderr)
      .with_target(false)
  });

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()?;

  tracing::debug!(
    log_dir = %log_dir.display(),
    level = %directive,
    pruned = removed,
    "logging initialized"
  );
  report_config_diagnostics(cfg);
  Ok(())
}

/// Emits every problem recorded while normalizing `cfg`.
pub fn report_config_diagnostics(cfg: &Config) {
  for d in &cfg.diagnostics {
    tracing::warn!(diagnostic = %d, "config entry ignored");
  }
}

// A non-empty env override wins over the configured level.
fn filter_directive(env_override: Option<&str>, configured: &str) -> String {
  match env_override.map(str::trim) {
    Some(v) if !v.is_empty() => v.to_string(),
    _ => configured.to_string(),
  }
}

/// Removes registry logs older than the retention window. Returns how many
/// were deleted.
fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> usize {
  if retention_days == 0 {
    return 0;
  }

  let cutoff = SystemTime::now()
    .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
    .unwrap_or(SystemTime::UNIX_EPOCH);

  let Ok(entries) = fs::read_dir(log_dir) else {
    return 0;
  };

  entries
    .flatten()
    .filter(|e| is_registry_log_file(&e.path()))
    .filter(|e| {
      e.metadata()
        .and_then(|m| m.modified())
        .map(|t| t < cutoff)
        .unwrap_or(false)
    })
    .filter(|e| fs::remove_file(e.path()).is_ok())
    .count()
}

fn is_registry_log_file(path: &Path) -> bool {
  path
    .file_name()
    .and_then(|n| n.to_str())
    .and_then(|n| n.strip_prefix(paths::LOG_FILE_NAME))
    .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use std::sync::{Arc, Mutex};

  #[derive(Clone, Default)]
  struct Captured(Arc<Mutex<Vec<u8>>>);

  impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn only_registry_logs_are_candidates_for_cleanup() {
    assert!(is_registry_log_file(Path::new("/tmp/logs/ioc-registry.log")));
    assert!(is_registry_log_file(Path::new("/tmp/logs/ioc-registry.log.2026-01-01")));
    assert!(!is_registry_log_file(Path::new("/tmp/logs/ioc-registry.logx")));
    assert!(!is_registry_log_file(Path::new("/tmp/logs/ledger.json")));
    assert!(!is_registry_log_file(Path::new("/tmp/logs/other.log")));
  }

  #[test]
  fn zero_retention_keeps_everything() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("ioc-registry.log.2000-01-01");
    fs::write(&p, b"old").unwrap();
    assert_eq!(cleanup_old_logs(dir.path(), 0), 0);
    assert!(p.exists());
  }

  #[test]
  fn fresh_logs_survive_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("ioc-registry.log.2026-10-19");
    fs::write(&p, b"today").unwrap();
    assert_eq!(cleanup_old_logs(dir.path(), 14), 0);
    assert!(p.exists());
  }

  #[test]
  fn env_override_beats_configured_level() {
    assert_eq!(filter_directive(Some("debug"), "info"), "debug");
    assert_eq!(filter_directive(Some("  "), "warn"), "warn");
    assert_eq!(filter_directive(None, "warn"), "warn");
  }

  #[test]
  fn config_diagnostics_are_logged_as_warnings() {
    let mut cfg = Config::default();
    cfg
      .diagnostics
      .push("[roles] admins: skipping invalid address \"0xdeadbeef\"".to_string());

    let buf = Captured::default();
    let sink = buf.clone();
    let subscriber = tracing_subscriber::fmt()
      .with_ansi(false)
      .with_writer(move || sink.clone())
      .finish();
    tracing::subscriber::with_default(subscriber, || report_config_diagnostics(&cfg));

    let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    assert!(out.contains("WARN"));
    assert!(out.contains("0xdeadbeef"));
  }
}
