//! Role gate for registry operations.
//!
//! The gate only answers whether a caller may act. Whether a claimed reporter
//! endorsed the content is answered separately by signature recovery.

use crate::config::RolesConfig;
use crate::error::RegistryError;
use crate::types::{Address, ThreatReport};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
  Admin,
  Researcher,
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Role::Admin => f.write_str("admin"),
      Role::Researcher => f.write_str("researcher"),
    }
  }
}

pub trait RoleOracle: Send + Sync {
  fn has_role(&self, principal: &Address, role: Role) -> bool;
}

/// In-process role table, seeded from config.
#[derive(Debug, Default)]
pub struct StaticRoleOracle {
  grants: RwLock<HashSet<(Address, Role)>>,
}

impl StaticRoleOracle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_config(cfg: &RolesConfig) -> Self {
    let oracle = Self::new();
    for a in &cfg.admins {
      oracle.grant(*a, Role::Admin);
    }
    for r in &cfg.researchers {
      oracle.grant(*r, Role::Researcher);
    }
    oracle
  }

  pub fn grant(&self, principal: Address, role: Role) {
    let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
    grants.insert((principal, role));
  }

  pub fn revoke(&self, principal: &Address, role: Role) -> bool {
    let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
    grants.remove(&(*principal, role))
  }

  pub fn members(&self, role: Role) -> Vec<Address> {
    let grants = self.grants.read().unwrap_or_else(|e| e.into_inner());
    let mut out: Vec<Address> = grants
      .iter()
      .filter(|(_, r)| *r == role)
      .map(|(a, _)| *a)
      .collect();
    out.sort();
    out
  }
}

impl RoleOracle for StaticRoleOracle {
  fn has_role(&self, principal: &Address, role: Role) -> bool {
    let grants = self.grants.read().unwrap_or_else(|e| e.into_inner());
    grants.contains(&(*principal, role))
  }
}

#[derive(Clone)]
pub struct AccessGate {
  oracle: Arc<dyn RoleOracle>,
}

impl AccessGate {
  pub fn new(oracle: Arc<dyn RoleOracle>) -> Self {
    Self { oracle }
  }

  pub fn require_researcher(&self, caller: &Address) -> Result<(), RegistryError> {
    if self.oracle.has_role(caller, Role::Researcher) {
      Ok(())
    } else {
      Err(RegistryError::Unauthorized)
    }
  }

  pub fn is_admin(&self, caller: &Address) -> bool {
    self.oracle.has_role(caller, Role::Admin)
  }

  pub fn is_original_reporter(caller: &Address, report: &ThreatReport) -> bool {
    *caller == report.reporter
  }

  pub fn may_deprecate(&self, caller: &Address, report: &ThreatReport) -> bool {
    Self::is_original_reporter(caller, report) || self.is_admin(caller)
  }
}
