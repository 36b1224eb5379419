//! Canonical, domain-separated digest of a report draft.
//!
//! Every field is folded in as a 32-byte word. Strings are hashed first so
//! the encoding is fixed-width regardless of their length. The submitter's
//! replay counter is the last word of the struct hash, so a signature only
//! verifies while the counter it was made against is still current.

use crate::config::DomainConfig;
use crate::types::{Address, ReportDraft};
use sha2::{Digest as _, Sha256};

pub type Digest = [u8; 32];

pub const REPORT_TYPE: &str = "ThreatReport(address reporter,uint8 iocType,string iocValue,uint8 severity,string description,uint256 nonce)";

pub const DOMAIN_TYPE: &str =
  "RegistryDomain(string name,string version,uint256 chainId,address instance)";

const DIGEST_PREFIX: [u8; 2] = [0x19, 0x01];

/// Context bound into every digest of one registry instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSeparator {
  name: String,
  version: String,
  chain_id: u64,
  instance: Address,
  separator: [u8; 32],
}

impl DomainSeparator {
  pub fn new(name: &str, version: &str, chain_id: u64, instance: Address) -> Self {
    let mut h = Sha256::new();
    h.update(hash_str(DOMAIN_TYPE));
    h.update(hash_str(name));
    h.update(hash_str(version));
    h.update(word_u64(chain_id));
    h.update(word_address(&instance));

    Self {
      name: name.to_string(),
      version: version.to_string(),
      chain_id,
      instance,
      separator: h.finalize().into(),
    }
  }

  pub fn from_config(cfg: &DomainConfig) -> Self {
    Self::new(&cfg.name, &cfg.version, cfg.chain_id, cfg.instance)
  }

  pub fn separator(&self) -> &[u8; 32] {
    &self.separator
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn chain_id(&self) -> u64 {
    self.chain_id
  }

  pub fn instance(&self) -> Address {
    self.instance
  }
}

/// Hash of the authorization-relevant draft fields plus the replay counter.
pub fn struct_hash(draft: &ReportDraft, nonce: u64) -> [u8; 32] {
  let mut h = Sha256::new();
  h.update(hash_str(REPORT_TYPE));
  h.update(word_address(&draft.reporter));
  h.update(word_u8(draft.ioc_type.as_u8()));
  h.update(hash_str(&draft.ioc_value));
  h.update(word_u8(draft.severity.as_u8()));
  h.update(hash_str(&draft.description));
  h.update(word_u64(nonce));
  h.finalize().into()
}

pub fn canonical_digest(domain: &DomainSeparator, draft: &ReportDraft, nonce: u64) -> Digest {
  let mut h = Sha256::new();
  h.update(DIGEST_PREFIX);
  h.update(domain.separator());
  h.update(struct_hash(draft, nonce));
  h.finalize().into()
}

fn hash_str(s: &str) -> [u8; 32] {
  Sha256::digest(s.as_bytes()).into()
}

fn word_u8(v: u8) -> [u8; 32] {
  let mut out = [0u8; 32];
  out[31] = v;
  out
}

fn word_u64(v: u64) -> [u8; 32] {
  let mut out = [0u8; 32];
  out[24..].copy_from_slice(&v.to_be_bytes());
  out
}

fn word_address(a: &Address) -> [u8; 32] {
  let mut out = [0u8; 32];
  out[12..].copy_from_slice(a.as_bytes());
  out
}
