use crate::error::ParseError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// 20-byte principal identity, derived from a secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
  pub const ZERO: Address = Address([0u8; 20]);

  pub fn is_zero(&self) -> bool {
    self.0 == [0u8; 20]
  }

  pub fn as_bytes(&self) -> &[u8; 20] {
    &self.0
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{}", hex::encode(self.0))
  }
}

impl fmt::Debug for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Address({self})")
  }
}

impl FromStr for Address {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    parse_hex_fixed::<20>(s).map(Address)
  }
}

impl Serialize for Address {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for Address {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

/// Identifier of the single authoritative record for an indicator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReportId(pub [u8; 32]);

impl ReportId {
  /// SHA-256 over the indicator type tag followed by the raw value bytes.
  /// The value is hashed as-is; no case folding or trimming.
  pub fn derive(ioc_type: IocType, ioc_value: &str) -> Self {
    let mut h = Sha256::new();
    h.update([ioc_type.as_u8()]);
    h.update(ioc_value.as_bytes());
    ReportId(h.finalize().into())
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }
}

impl fmt::Display for ReportId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{}", hex::encode(self.0))
  }
}

impl fmt::Debug for ReportId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ReportId({self})")
  }
}

impl FromStr for ReportId {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    parse_hex_fixed::<32>(s).map(ReportId)
  }
}

impl Serialize for ReportId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for ReportId {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocType {
  IpAddress,
  DomainName,
  FileHash,
  WalletAddress,
}

impl IocType {
  pub fn as_u8(self) -> u8 {
    match self {
      IocType::IpAddress => 0,
      IocType::DomainName => 1,
      IocType::FileHash => 2,
      IocType::WalletAddress => 3,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      IocType::IpAddress => "ip_address",
      IocType::DomainName => "domain_name",
      IocType::FileHash => "file_hash",
      IocType::WalletAddress => "wallet_address",
    }
  }
}

impl fmt::Display for IocType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for IocType {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "ip_address" | "ip" => Ok(IocType::IpAddress),
      "domain_name" | "domain" => Ok(IocType::DomainName),
      "file_hash" | "hash" => Ok(IocType::FileHash),
      "wallet_address" | "wallet" => Ok(IocType::WalletAddress),
      other => Err(ParseError::UnknownVariant {
        kind: "ioc type",
        value: other.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  High,
  Critical,
}

impl Severity {
  pub fn as_u8(self) -> u8 {
    match self {
      Severity::Low => 0,
      Severity::Medium => 1,
      Severity::High => 2,
      Severity::Critical => 3,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Severity::Low => "low",
      Severity::Medium => "medium",
      Severity::High => "high",
      Severity::Critical => "critical",
    }
  }
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Severity {
  type Err = ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "low" => Ok(Severity::Low),
      "medium" => Ok(Severity::Medium),
      "high" => Ok(Severity::High),
      "critical" => Ok(Severity::Critical),
      other => Err(ParseError::UnknownVariant {
        kind: "severity",
        value: other.to_string(),
      }),
    }
  }
}

/// Candidate record as signed by the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDraft {
  pub reporter: Address,
  pub ioc_type: IocType,
  pub ioc_value: String,
  pub severity: Severity,
  #[serde(default)]
  pub description: String,
}

impl ReportDraft {
  pub fn report_id(&self) -> ReportId {
    ReportId::derive(self.ioc_type, &self.ioc_value)
  }
}

/// Stored record. `created_at_unix_ms` is assigned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatReport {
  pub reporter: Address,
  pub ioc_type: IocType,
  pub ioc_value: String,
  pub severity: Severity,
  pub description: String,
  pub created_at_unix_ms: u64,
  #[serde(default)]
  pub is_deprecated: bool,
}

impl ThreatReport {
  pub fn from_draft(draft: ReportDraft, created_at_unix_ms: u64) -> Self {
    Self {
      reporter: draft.reporter,
      ioc_type: draft.ioc_type,
      ioc_value: draft.ioc_value,
      severity: draft.severity,
      description: draft.description,
      created_at_unix_ms,
      is_deprecated: false,
    }
  }

  pub fn id(&self) -> ReportId {
    ReportId::derive(self.ioc_type, &self.ioc_value)
  }
}

fn parse_hex_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseError> {
  let t = s.trim();
  let t = t
    .strip_prefix("0x")
    .or_else(|| t.strip_prefix("0X"))
    .unwrap_or(t);
  let bytes = hex::decode(t).map_err(|_| ParseError::InvalidHex)?;
  if bytes.len() != N {
    return Err(ParseError::InvalidLength {
      expected: N,
      actual: bytes.len(),
    });
  }
  let mut out = [0u8; N];
  out.copy_from_slice(&bytes);
  Ok(out)
}

pub fn now_unix_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn report_id_is_deterministic_and_type_scoped() {
    let a = ReportId::derive(IocType::IpAddress, "198.51.100.10");
    let b = ReportId::derive(IocType::IpAddress, "198.51.100.10");
    let c = ReportId::derive(IocType::DomainName, "198.51.100.10");
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn report_id_does_not_normalize_values() {
    let a = ReportId::derive(IocType::IpAddress, "1.2.3.4");
    let b = ReportId::derive(IocType::IpAddress, "1.2.3.04");
    let c = ReportId::derive(IocType::DomainName, "X.com");
    let d = ReportId::derive(IocType::DomainName, "x.com");
    assert_ne!(a, b);
    assert_ne!(c, d);
  }

  #[test]
  fn address_parses_with_and_without_prefix() {
    let a: Address = "0x00000000000000000000000000000000000000AB".parse().unwrap();
    let b: Address = "00000000000000000000000000000000000000ab".parse().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "0x00000000000000000000000000000000000000ab");
    assert!(!a.is_zero());
    assert!(Address::ZERO.is_zero());
  }

  #[test]
  fn address_rejects_bad_input() {
    assert!(matches!(
      "0x1234".parse::<Address>(),
      Err(ParseError::InvalidLength {
        expected: 20,
        actual: 2
      })
    ));
    assert!(matches!(
      "0xzz00000000000000000000000000000000000000".parse::<Address>(),
      Err(ParseError::InvalidHex)
    ));
  }

  #[test]
  fn report_id_display_round_trips() {
    let id = ReportId::derive(IocType::FileHash, "e3b0c442");
    let parsed: ReportId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
  }

  #[test]
  fn ioc_type_accepts_short_aliases() {
    assert_eq!("ip".parse::<IocType>().unwrap(), IocType::IpAddress);
    assert_eq!("Domain_Name".parse::<IocType>().unwrap(), IocType::DomainName);
    assert!("url".parse::<IocType>().is_err());
    assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
  }

  #[test]
  fn draft_deserializes_from_toml() {
    let raw = r#"
reporter = "0x1111111111111111111111111111111111111111"
ioc_type = "ip_address"
ioc_value = "198.51.100.10"
severity = "high"
description = "Phishing C2 Server"
"#;
    let draft: ReportDraft = toml::from_str(raw).unwrap();
    assert_eq!(draft.ioc_type, IocType::IpAddress);
    assert_eq!(draft.severity, Severity::High);
    assert_eq!(draft.report_id(), ReportId::derive(IocType::IpAddress, "198.51.100.10"));
  }
}
