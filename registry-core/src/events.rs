use crate::types::{now_unix_ms, Address, IocType, ReportId, Severity};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
  ReportSubmitted {
    id: ReportId,
    reporter: Address,
    ioc_type: IocType,
    ioc_value: String,
    severity: Severity,
  },
  ReportDeprecated {
    id: ReportId,
    deprecated_by: Address,
  },
}

impl EventKind {
  pub fn name(&self) -> &'static str {
    match self {
      EventKind::ReportSubmitted { .. } => "report_submitted",
      EventKind::ReportDeprecated { .. } => "report_deprecated",
    }
  }

  pub fn report_id(&self) -> ReportId {
    match self {
      EventKind::ReportSubmitted { id, .. } | EventKind::ReportDeprecated { id, .. } => *id,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
  pub event_id: uuid::Uuid,
  pub emitted_at_unix_ms: u64,
  #[serde(flatten)]
  pub kind: EventKind,
}

impl RegistryEvent {
  pub fn new(kind: EventKind) -> Self {
    Self {
      event_id: uuid::Uuid::new_v4(),
      emitted_at_unix_ms: now_unix_ms(),
      kind,
    }
  }
}

/// Fire-and-forget from the registry's point of view; delivery failures are
/// the sink's to log.
pub trait EventSink: Send + Sync {
  fn emit(&self, event: &RegistryEvent);
}

#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
  fn emit(&self, event: &RegistryEvent) {
    match &event.kind {
      EventKind::ReportSubmitted {
        id,
        reporter,
        ioc_type,
        severity,
        ..
      } => tracing::info!(
        event_id = %event.event_id,
        report_id = %id,
        reporter = %reporter,
        ioc_type = %ioc_type,
        severity = %severity,
        "report submitted"
      ),
      EventKind::ReportDeprecated { id, deprecated_by } => tracing::info!(
        event_id = %event.event_id,
        report_id = %id,
        deprecated_by = %deprecated_by,
        "report deprecated"
      ),
    }
  }
}

#[derive(Debug, Default)]
pub struct MemorySink {
  events: Mutex<Vec<RegistryEvent>>,
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(&self) -> Vec<RegistryEvent> {
    self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

impl EventSink for MemorySink {
  fn emit(&self, event: &RegistryEvent) {
    self
      .events
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(event.clone());
  }
}

#[derive(Default)]
pub struct FanoutSink {
  sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
  pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
    Self { sinks }
  }
}

impl EventSink for FanoutSink {
  fn emit(&self, event: &RegistryEvent) {
    for s in &self.sinks {
      s.emit(event);
    }
  }
}

/// Append-only JSON-lines event log.
#[derive(Debug)]
pub struct JsonlEventLog {
  path: PathBuf,
  write_lock: Mutex<()>,
}

impl JsonlEventLog {
  pub fn new(path: &Path) -> Self {
    Self {
      path: path.to_path_buf(),
      write_lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn append(&self, event: &RegistryEvent) -> anyhow::Result<()> {
    let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(dir) = self.path.parent() {
      fs::create_dir_all(dir)?;
    }
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');

    let mut f = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    f.write_all(&line)?;
    Ok(())
  }
}

impl EventSink for JsonlEventLog {
  fn emit(&self, event: &RegistryEvent) {
    if let Err(e) = self.append(event) {
      tracing::error!(
        event_id = %event.event_id,
        path = %self.path.display(),
        error = ?e,
        "failed to append event (continuing)"
      );
    }
  }
}

/// Newest first. Unparseable lines are skipped.
pub fn list_recent(path: &Path, limit: usize) -> anyhow::Result<Vec<RegistryEvent>> {
  if !path.exists() {
    return Ok(Vec::new());
  }

  let f = fs::File::open(path)?;
  let mut out: Vec<RegistryEvent> = BufReader::new(f)
    .lines()
    .map_while(Result::ok)
    .filter_map(|line| serde_json::from_str(&line).ok())
    .collect();

  out.reverse();
  out.truncate(limit);
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn submitted(value: &str) -> RegistryEvent {
    RegistryEvent::new(EventKind::ReportSubmitted {
      id: ReportId::derive(IocType::DomainName, value),
      reporter: Address([1; 20]),
      ioc_type: IocType::DomainName,
      ioc_value: value.to_string(),
      severity: Severity::High,
    })
  }

  #[test]
  fn event_json_is_flat_and_tagged() {
    let ev = RegistryEvent::new(EventKind::ReportDeprecated {
      id: ReportId::derive(IocType::DomainName, "x.com"),
      deprecated_by: Address([9; 20]),
    });
    let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
    assert_eq!(v["event"], "report_deprecated");
    assert_eq!(v["deprecated_by"], Address([9; 20]).to_string());
    assert!(v["event_id"].is_string());
  }

  #[test]
  fn jsonl_log_lists_newest_first_and_skips_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let log = JsonlEventLog::new(&path);

    let first = submitted("a.example");
    let second = submitted("b.example");
    log.emit(&first);
    fs::OpenOptions::new()
      .append(true)
      .open(&path)
      .unwrap()
      .write_all(b"garbage\n")
      .unwrap();
    log.emit(&second);

    let recent = list_recent(&path, 10).unwrap();
    assert_eq!(recent, vec![second.clone(), first]);
    assert_eq!(list_recent(&path, 1).unwrap(), vec![second]);
  }

  #[test]
  fn missing_log_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(list_recent(&dir.path().join("none.jsonl"), 5).unwrap().is_empty());
  }

  #[test]
  fn fanout_reaches_every_sink() {
    let a = Arc::new(MemorySink::new());
    let b = Arc::new(MemorySink::new());
    let sinks: Vec<Arc<dyn EventSink>> = vec![a.clone(), b.clone(), Arc::new(TracingSink)];
    let fan = FanoutSink::new(sinks);
    fan.emit(&submitted("c.example"));
    assert_eq!(a.events().len(), 1);
    assert_eq!(b.events(), a.events());
  }
}
