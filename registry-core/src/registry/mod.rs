//! The report registry: signed submission, deprecation, and read queries.
//!
//! Each mutating operation runs under the ledger mutex from its first ledger
//! read to its event emission. Mutations are journaled by the ledger and
//! either committed together or rolled back together.

use crate::access::{AccessGate, RoleOracle, StaticRoleOracle};
use crate::config::Config;
use crate::digest::{canonical_digest, Digest, DomainSeparator};
use crate::error::RegistryError;
use crate::events::{EventKind, EventSink, FanoutSink, JsonlEventLog, RegistryEvent, TracingSink};
use crate::paths;
use crate::signature::recover_signer;
use crate::store::{FileLedger, Ledger};
use crate::types::{now_unix_ms, Address, IocType, ReportDraft, ReportId, ThreatReport};
use anyhow::Context;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct Registry<L: Ledger> {
  domain: DomainSeparator,
  ledger: Mutex<L>,
  gate: AccessGate,
  events: Arc<dyn EventSink>,
}

impl<L: Ledger> Registry<L> {
  pub fn new(
    domain: DomainSeparator,
    ledger: L,
    roles: Arc<dyn RoleOracle>,
    events: Arc<dyn EventSink>,
  ) -> Self {
    Self {
      domain,
      ledger: Mutex::new(ledger),
      gate: AccessGate::new(roles),
      events,
    }
  }

  pub fn domain(&self) -> &DomainSeparator {
    &self.domain
  }

  /// Stores a signed report. Checks run in a fixed order: role, caller
  /// binding, signature at the reporter's live counter, then slot state.
  pub fn submit(
    &self,
    draft: ReportDraft,
    signature: &[u8],
    caller: &Address,
  ) -> Result<ReportId, RegistryError> {
    if let Err(e) = self.gate.require_researcher(caller) {
      tracing::warn!(caller = %caller, "submission rejected: caller lacks researcher role");
      return Err(e);
    }

    if *caller != draft.reporter {
      tracing::warn!(
        caller = %caller,
        reporter = %draft.reporter,
        "submission rejected: caller is not the claimed reporter"
      );
      return Err(RegistryError::ReporterMismatch);
    }

    let mut ledger = self.lock();

    let nonce = ledger.counter(&draft.reporter);
    let digest = canonical_digest(&self.domain, &draft, nonce);
    match recover_signer(&digest, signature) {
      Ok(signer) if signer == draft.reporter => {}
      Ok(signer) => {
        tracing::debug!(
          reporter = %draft.reporter,
          recovered = %signer,
          nonce,
          "signature recovers to a different address"
        );
        return Err(RegistryError::SignerMismatch);
      }
      Err(e) => {
        tracing::debug!(reporter = %draft.reporter, error = %e, "signature rejected");
        return Err(RegistryError::SignerMismatch);
      }
    }

    let id = draft.report_id();
    if let Some(existing) = ledger.get(&id) {
      tracing::info!(
        report_id = %id,
        deprecated = existing.is_deprecated,
        "submission rejected: indicator already registered"
      );
      return Err(if existing.is_deprecated {
        RegistryError::CannotUpdateDeprecated
      } else {
        RegistryError::AlreadyExists
      });
    }

    let event = EventKind::ReportSubmitted {
      id,
      reporter: draft.reporter,
      ioc_type: draft.ioc_type,
      ioc_value: draft.ioc_value.clone(),
      severity: draft.severity,
    };
    let reporter = draft.reporter;
    let ioc_type = draft.ioc_type;

    transact(&mut *ledger, |l| {
      l.put(id, ThreatReport::from_draft(draft, now_unix_ms()))?;
      l.increment(&reporter);
      Ok(())
    })?;

    tracing::info!(
      report_id = %id,
      reporter = %reporter,
      ioc_type = %ioc_type,
      nonce = nonce + 1,
      "report stored"
    );
    self.events.emit(&RegistryEvent::new(event));
    Ok(id)
  }

  /// Marks a report deprecated. Authorized by caller identity alone: the
  /// original reporter or an admin.
  pub fn deprecate(&self, id: &ReportId, caller: &Address) -> Result<(), RegistryError> {
    let mut ledger = self.lock();

    let Some(report) = ledger.get(id) else {
      return Err(RegistryError::NotFound);
    };

    if !self.gate.may_deprecate(caller, &report) {
      tracing::warn!(
        report_id = %id,
        caller = %caller,
        "deprecation rejected: caller is neither reporter nor admin"
      );
      return Err(RegistryError::Unauthorized);
    }

    if report.is_deprecated {
      return Err(RegistryError::AlreadyDeprecated);
    }

    transact(&mut *ledger, |l| {
      l.update(id, &mut |r| r.is_deprecated = true)?;
      Ok(())
    })?;

    tracing::info!(report_id = %id, caller = %caller, "report deprecated");
    self.events.emit(&RegistryEvent::new(EventKind::ReportDeprecated {
      id: *id,
      deprecated_by: *caller,
    }));
    Ok(())
  }

  pub fn report(&self, id: &ReportId) -> Option<ThreatReport> {
    self.lock().get(id)
  }

  pub fn report_for(&self, ioc_type: IocType, ioc_value: &str) -> Option<ThreatReport> {
    self.report(&ReportId::derive(ioc_type, ioc_value))
  }

  pub fn nonce(&self, principal: &Address) -> u64 {
    self.lock().counter(principal)
  }

  /// Digest an external signer must sign for `draft` to be accepted next.
  pub fn digest_for(&self, draft: &ReportDraft) -> Digest {
    let nonce = self.nonce(&draft.reporter);
    canonical_digest(&self.domain, draft, nonce)
  }

  fn lock(&self) -> MutexGuard<'_, L> {
    match self.ledger.lock() {
      Ok(g) => g,
      Err(poisoned) => {
        let mut g = poisoned.into_inner();
        g.rollback();
        tracing::warn!("ledger mutex was poisoned; uncommitted changes rolled back");
        g
      }
    }
  }
}

impl Registry<FileLedger> {
  /// File-backed registry with config roles and a tracing + JSONL event sink.
  pub fn open(cfg: &Config, base: &Path) -> anyhow::Result<Self> {
    let state_path = paths::state_path(base, cfg);
    let ledger = FileLedger::open(&state_path)
      .with_context(|| format!("open ledger {}", state_path.display()))?;

    let roles: Arc<dyn RoleOracle> = Arc::new(StaticRoleOracle::from_config(&cfg.roles));
    let sinks: Vec<Arc<dyn EventSink>> = vec![
      Arc::new(TracingSink),
      Arc::new(JsonlEventLog::new(&paths::event_log_path(base, cfg))),
    ];

    Ok(Self::new(
      DomainSeparator::from_config(&cfg.domain),
      ledger,
      roles,
      Arc::new(FanoutSink::new(sinks)),
    ))
  }

  /// Query-only registry over the last committed snapshot. Takes no writer
  /// lock, so it works while another process holds the ledger. Mutations fail
  /// with `StoreError::ReadOnly`.
  pub fn open_readonly(cfg: &Config, base: &Path) -> anyhow::Result<Self> {
    let state_path = paths::state_path(base, cfg);
    let ledger = FileLedger::open_readonly(&state_path)
      .with_context(|| format!("read ledger {}", state_path.display()))?;

    Ok(Self::new(
      DomainSeparator::from_config(&cfg.domain),
      ledger,
      Arc::new(StaticRoleOracle::from_config(&cfg.roles)),
      Arc::new(TracingSink),
    ))
  }

  pub fn ledger_path(&self) -> std::path::PathBuf {
    self.lock().path().to_path_buf()
  }
}

fn transact<L, T>(
  ledger: &mut L,
  apply: impl FnOnce(&mut L) -> Result<T, RegistryError>,
) -> Result<T, RegistryError>
where
  L: Ledger,
{
  match apply(ledger) {
    Ok(v) => {
      if let Err(e) = ledger.commit() {
        ledger.rollback();
        tracing::error!(error = %e, "ledger commit failed; operation rolled back");
        return Err(e.into());
      }
      Ok(v)
    }
    Err(e) => {
      ledger.rollback();
      Err(e)
    }
  }
}
