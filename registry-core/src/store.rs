//! Ledger boundary: report slots, replay counters, and commit/rollback.
//!
//! The registry mutates a ledger only while holding its lock and calls
//! `commit` before releasing it. A failed commit rolls every mutation since
//! the previous commit back, so an operation lands completely or not at all.

use crate::error::StoreError;
use crate::types::{Address, ReportId, ThreatReport};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait ReportStore {
  fn get(&self, id: &ReportId) -> Option<ThreatReport>;

  /// Inserts into an empty slot; `StoreError::Occupied` otherwise.
  fn put(&mut self, id: ReportId, report: ThreatReport) -> Result<(), StoreError>;

  fn update(
    &mut self,
    id: &ReportId,
    mutate: &mut dyn FnMut(&mut ThreatReport),
  ) -> Result<(), StoreError>;
}

pub trait CounterStore {
  fn counter(&self, principal: &Address) -> u64;

  /// Returns the new value.
  fn increment(&mut self, principal: &Address) -> u64;
}

pub trait Ledger: ReportStore + CounterStore + Send {
  fn commit(&mut self) -> Result<(), StoreError> {
    Ok(())
  }

  fn rollback(&mut self) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
  #[serde(default)]
  pub reports: BTreeMap<ReportId, ThreatReport>,
  #[serde(default)]
  pub nonces: BTreeMap<Address, u64>,
}

#[derive(Debug, Clone)]
enum Undo {
  Inserted(ReportId),
  Updated(ReportId, ThreatReport),
  Counter(Address, Option<u64>),
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
  state: LedgerState,
  journal: Vec<Undo>,
}

impl MemoryLedger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_state(state: LedgerState) -> Self {
    Self {
      state,
      journal: Vec::new(),
    }
  }

  pub fn state(&self) -> &LedgerState {
    &self.state
  }

  pub fn has_pending(&self) -> bool {
    !self.journal.is_empty()
  }
}

impl ReportStore for MemoryLedger {
  fn get(&self, id: &ReportId) -> Option<ThreatReport> {
    self.state.reports.get(id).cloned()
  }

  fn put(&mut self, id: ReportId, report: ThreatReport) -> Result<(), StoreError> {
    if self.state.reports.contains_key(&id) {
      return Err(StoreError::Occupied(id.to_string()));
    }
    self.state.reports.insert(id, report);
    self.journal.push(Undo::Inserted(id));
    Ok(())
  }

  fn update(
    &mut self,
    id: &ReportId,
    mutate: &mut dyn FnMut(&mut ThreatReport),
  ) -> Result<(), StoreError> {
    let slot = self
      .state
      .reports
      .get_mut(id)
      .ok_or_else(|| StoreError::Missing(id.to_string()))?;
    self.journal.push(Undo::Updated(*id, slot.clone()));
    mutate(slot);
    Ok(())
  }
}

impl CounterStore for MemoryLedger {
  fn counter(&self, principal: &Address) -> u64 {
    self.state.nonces.get(principal).copied().unwrap_or(0)
  }

  fn increment(&mut self, principal: &Address) -> u64 {
    let prev = self.state.nonces.get(principal).copied();
    let next = prev.unwrap_or(0).saturating_add(1);
    self.state.nonces.insert(*principal, next);
    self.journal.push(Undo::Counter(*principal, prev));
    next
  }
}

impl Ledger for MemoryLedger {
  fn commit(&mut self) -> Result<(), StoreError> {
    self.journal.clear();
    Ok(())
  }

  fn rollback(&mut self) {
    while let Some(undo) = self.journal.pop() {
      match undo {
        Undo::Inserted(id) => {
          self.state.reports.remove(&id);
        }
        Undo::Updated(id, before) => {
          self.state.reports.insert(id, before);
        }
        Undo::Counter(who, Some(prev)) => {
          self.state.nonces.insert(who, prev);
        }
        Undo::Counter(who, None) => {
          self.state.nonces.remove(&who);
        }
      }
    }
  }
}

/// JSON snapshot on disk, rewritten atomically on every commit. A writable
/// ledger holds an exclusive lock on `<state>.lock` for as long as it is open.
/// A read-only ledger takes no lock and refuses to commit.
#[derive(Debug)]
pub struct FileLedger {
  path: PathBuf,
  inner: MemoryLedger,
  lock: Option<File>,
}

impl FileLedger {
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    let dir = path.parent().ok_or_else(|| StoreError::Corrupt {
      path: path.to_path_buf(),
      reason: "ledger path has no parent directory".to_string(),
    })?;
    fs::create_dir_all(dir)?;

    let lock_path = lock_path(path);
    let lock = OpenOptions::new()
      .create(true)
      .read(true)
      .write(true)
      .truncate(false)
      .open(&lock_path)?;
    lock
      .try_lock_exclusive()
      .map_err(|_| StoreError::Locked(path.to_path_buf()))?;

    Self::load(path, Some(lock))
  }

  /// Snapshot view of the last committed state. Never blocks on, or is
  /// blocked by, a writer; a missing snapshot reads as empty.
  pub fn open_readonly(path: &Path) -> Result<Self, StoreError> {
    Self::load(path, None)
  }

  fn load(path: &Path, lock: Option<File>) -> Result<Self, StoreError> {
    let state = if path.exists() {
      let bytes = fs::read(path)?;
      serde_json::from_slice::<LedgerState>(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
      })?
    } else {
      LedgerState::default()
    };

    tracing::debug!(
      path = %path.display(),
      reports = state.reports.len(),
      principals = state.nonces.len(),
      writable = lock.is_some(),
      "ledger opened"
    );

    Ok(Self {
      path: path.to_path_buf(),
      inner: MemoryLedger::from_state(state),
      lock,
    })
  }

  pub fn is_read_only(&self) -> bool {
    self.lock.is_none()
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn state(&self) -> &LedgerState {
    self.inner.state()
  }

  fn persist(&self) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(self.inner.state()).map_err(|e| StoreError::Corrupt {
      path: self.path.clone(),
      reason: e.to_string(),
    })?;
    atomic_write_file(&self.path, &bytes)
  }
}

impl ReportStore for FileLedger {
  fn get(&self, id: &ReportId) -> Option<ThreatReport> {
    self.inner.get(id)
  }

  fn put(&mut self, id: ReportId, report: ThreatReport) -> Result<(), StoreError> {
    self.inner.put(id, report)
  }

  fn update(
    &mut self,
    id: &ReportId,
    mutate: &mut dyn FnMut(&mut ThreatReport),
  ) -> Result<(), StoreError> {
    self.inner.update(id, mutate)
  }
}

impl CounterStore for FileLedger {
  fn counter(&self, principal: &Address) -> u64 {
    self.inner.counter(principal)
  }

  fn increment(&mut self, principal: &Address) -> u64 {
    self.inner.increment(principal)
  }
}

impl Ledger for FileLedger {
  fn commit(&mut self) -> Result<(), StoreError> {
    if !self.inner.has_pending() {
      return Ok(());
    }
    if self.is_read_only() {
      self.inner.rollback();
      return Err(StoreError::ReadOnly(self.path.clone()));
    }
    if let Err(e) = self.persist() {
      self.inner.rollback();
      return Err(e);
    }
    self.inner.commit()
  }

  fn rollback(&mut self) {
    self.inner.rollback();
  }
}

fn lock_path(state_path: &Path) -> PathBuf {
  let name = state_path
    .file_name()
    .and_then(|s| s.to_str())
    .unwrap_or("ledger");
  state_path.with_file_name(format!("{name}.lock"))
}

fn atomic_write_file(dst: &Path, bytes: &[u8]) -> Result<(), StoreError> {
  let name = dst.file_name().and_then(|s| s.to_str()).unwrap_or("tmp");
  let tmp = dst.with_file_name(format!(".{name}.tmp"));

  let mut f = File::create(&tmp)?;
  f.write_all(bytes)?;
  f.sync_all()?;
  drop(f);
  fs::rename(&tmp, dst)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{IocType, Severity};

  fn report(value: &str) -> ThreatReport {
    ThreatReport {
      reporter: Address([1; 20]),
      ioc_type: IocType::FileHash,
      ioc_value: value.to_string(),
      severity: Severity::Low,
      description: "sample".to_string(),
      created_at_unix_ms: 1_700_000_000_000,
      is_deprecated: false,
    }
  }

  #[test]
  fn put_refuses_occupied_slot() {
    let mut l = MemoryLedger::new();
    let r = report("aa");
    l.put(r.id(), r.clone()).unwrap();

    let mut other = report("aa");
    other.description = "changed".to_string();
    assert!(matches!(l.put(r.id(), other), Err(StoreError::Occupied(_))));
    assert_eq!(l.get(&r.id()).unwrap().description, "sample");
  }

  #[test]
  fn update_requires_existing_slot() {
    let mut l = MemoryLedger::new();
    let id = report("bb").id();
    let res = l.update(&id, &mut |r| r.is_deprecated = true);
    assert!(matches!(res, Err(StoreError::Missing(_))));
  }

  #[test]
  fn counters_start_at_zero_and_step_by_one() {
    let mut l = MemoryLedger::new();
    let who = Address([5; 20]);
    assert_eq!(l.counter(&who), 0);
    assert_eq!(l.increment(&who), 1);
    assert_eq!(l.increment(&who), 2);
    assert_eq!(l.counter(&Address([6; 20])), 0);
  }

  #[test]
  fn rollback_undoes_uncommitted_changes_only() {
    let mut l = MemoryLedger::new();
    let who = Address([5; 20]);
    let kept = report("kept");
    l.put(kept.id(), kept.clone()).unwrap();
    l.increment(&who);
    l.commit().unwrap();

    let dropped = report("dropped");
    l.put(dropped.id(), dropped.clone()).unwrap();
    l.update(&kept.id(), &mut |r| r.is_deprecated = true).unwrap();
    l.increment(&who);
    l.increment(&Address([6; 20]));
    l.rollback();

    assert!(l.get(&dropped.id()).is_none());
    assert!(!l.get(&kept.id()).unwrap().is_deprecated);
    assert_eq!(l.counter(&who), 1);
    assert!(!l.state().nonces.contains_key(&Address([6; 20])));
  }

  #[test]
  fn file_ledger_persists_committed_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let r = report("cc");
    let who = Address([5; 20]);

    {
      let mut l = FileLedger::open(&path).unwrap();
      l.put(r.id(), r.clone()).unwrap();
      l.increment(&who);
      l.commit().unwrap();

      l.increment(&who);
      l.rollback();
    }

    let l = FileLedger::open(&path).unwrap();
    assert_eq!(l.get(&r.id()), Some(r));
    assert_eq!(l.counter(&who), 1);
  }

  #[test]
  fn uncommitted_changes_are_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    {
      let mut l = FileLedger::open(&path).unwrap();
      l.increment(&Address([5; 20]));
    }
    let l = FileLedger::open(&path).unwrap();
    assert_eq!(l.counter(&Address([5; 20])), 0);
  }

  #[test]
  fn second_open_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let _first = FileLedger::open(&path).unwrap();
    assert!(matches!(FileLedger::open(&path), Err(StoreError::Locked(_))));
  }

  #[test]
  fn readonly_open_sees_committed_state_while_writer_holds_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let r = report("dd");
    let who = Address([5; 20]);

    let mut writer = FileLedger::open(&path).unwrap();
    writer.put(r.id(), r.clone()).unwrap();
    writer.increment(&who);
    writer.commit().unwrap();
    writer.increment(&who);

    let reader = FileLedger::open_readonly(&path).unwrap();
    assert!(reader.is_read_only());
    assert!(!writer.is_read_only());
    assert_eq!(reader.get(&r.id()), Some(r));
    assert_eq!(reader.counter(&who), 1);
  }

  #[test]
  fn readonly_ledger_refuses_to_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let mut reader = FileLedger::open_readonly(&path).unwrap();
    reader.increment(&Address([5; 20]));

    assert!(matches!(reader.commit(), Err(StoreError::ReadOnly(_))));
    assert_eq!(reader.counter(&Address([5; 20])), 0);
    assert!(!path.exists());
    assert!(!dir.path().join("ledger.json.lock").exists());
  }

  #[test]
  fn corrupt_snapshot_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    fs::write(&path, b"{ not json").unwrap();
    assert!(matches!(FileLedger::open(&path), Err(StoreError::Corrupt { .. })));
  }
}
