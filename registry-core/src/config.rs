use crate::types::Address;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub domain: DomainConfig,
  pub roles: RolesConfig,
  pub store: StoreConfig,
  pub logging: LoggingConfig,

  /// Problems found while normalizing the file. Reported once logging is up.
  pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
  #[serde(default = "default_domain_name")]
  pub name: String,

  #[serde(default = "default_domain_version")]
  pub version: String,

  #[serde(default = "default_chain_id")]
  pub chain_id: u64,

  #[serde(default = "default_instance")]
  pub instance: Address,
}

impl Default for DomainConfig {
  fn default() -> Self {
    Self {
      name: default_domain_name(),
      version: default_domain_version(),
      chain_id: default_chain_id(),
      instance: default_instance(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolesConfig {
  pub admins: Vec<Address>,
  pub researchers: Vec<Address>,
}

// Role lists are kept as strings on disk so one bad entry does not reset the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RolesFile {
  #[serde(default)]
  admins: Vec<String>,

  #[serde(default)]
  researchers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
  #[serde(default = "default_state_file")]
  pub state_file: String,

  #[serde(default = "default_event_log")]
  pub event_log: String,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      state_file: default_state_file(),
      event_log: default_event_log(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

fn default_domain_name() -> String {
  "ThreatIntelRegistry".to_string()
}

fn default_domain_version() -> String {
  "1".to_string()
}

fn default_chain_id() -> u64 {
  1
}

fn default_instance() -> Address {
  let mut raw = [0u8; 20];
  raw[19] = 1;
  Address(raw)
}

fn default_state_file() -> String {
  "ledger.json".to_string()
}

fn default_event_log() -> String {
  "events.jsonl".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub domain: Option<DomainConfig>,

  #[serde(default)]
  pub roles: Option<RolesFile>,

  #[serde(default)]
  pub store: Option<StoreConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();

    if let Some(d) = self.domain {
      cfg.domain = d;
    }
    if let Some(reason) = validate_domain(&cfg.domain) {
      cfg
        .diagnostics
        .push(format!("[domain] invalid ({reason}); using the default domain"));
      cfg.domain = DomainConfig::default();
    }

    if let Some(r) = self.roles {
      cfg.roles = RolesConfig {
        admins: parse_addresses("admins", &r.admins, &mut cfg.diagnostics),
        researchers: parse_addresses("researchers", &r.researchers, &mut cfg.diagnostics),
      };
    }
    if let Some(s) = self.store {
      cfg.store = s;
    }
    if let Some(l) = self.logging {
      cfg.logging = l;
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.domain.is_none() || self.roles.is_none() || self.store.is_none() || self.logging.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  if allow_writes {
    fs::create_dir_all(parent)?;
  }

  if !path.exists() {
    let cfg = Config::default();
    if allow_writes {
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
    } else {
      eprintln!(
        "ioc-registry: config missing at {}; using defaults in read-only mode.",
        path.display()
      );
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let needs_upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if allow_writes && needs_upgrade {
        match upgrade_in_place(path, &cfg) {
          Ok(backup) => eprintln!(
            "ioc-registry: upgraded config defaults written to {} (backup: {})",
            path.display(),
            backup.display()
          ),
          Err(e) => eprintln!(
            "ioc-registry: could not upgrade config at {}; continuing with in-memory defaults: {e:#}",
            path.display()
          ),
        }
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      if allow_writes {
        let backup = parent.join(format!("config.toml.bad-{}", now_unix_s()));
        match fs::rename(path, &backup) {
          Ok(()) => {
            write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
            eprintln!(
              "ioc-registry: invalid config at {} (backed up to {}): {e}",
              path.display(),
              backup.display()
            );
          }
          Err(rename_err) => eprintln!(
            "ioc-registry: invalid config at {} left in place (backup failed: {rename_err}); using defaults: {e}",
            path.display()
          ),
        }
      } else {
        eprintln!(
          "ioc-registry: invalid config at {}; using defaults in read-only mode: {e}",
          path.display()
        );
      }
      Ok(cfg)
    }
  }
}

/// Backs up `path` and rewrites it with every section present. Returns the
/// backup path. Nothing is rewritten unless the backup succeeded.
fn upgrade_in_place(path: &Path, cfg: &Config) -> anyhow::Result<PathBuf> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  let backup = parent.join(format!("config.toml.bak-{}", now_unix_s()));
  fs::copy(path, &backup).with_context(|| format!("back up config to {}", backup.display()))?;
  write_atomic(path, &toml::to_string_pretty(&to_config_file(cfg))?)
    .with_context(|| format!("rewrite {}", path.display()))?;
  Ok(backup)
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    domain: Some(cfg.domain.clone()),
    roles: Some(RolesFile {
      admins: cfg.roles.admins.iter().map(|a| a.to_string()).collect(),
      researchers: cfg.roles.researchers.iter().map(|a| a.to_string()).collect(),
    }),
    store: Some(cfg.store.clone()),
    logging: Some(cfg.logging.clone()),
  }
}

fn parse_addresses(role: &str, raw: &[String], diagnostics: &mut Vec<String>) -> Vec<Address> {
  let mut out = Vec::new();
  for entry in raw {
    match entry.parse::<Address>() {
      Ok(a) => out.push(a),
      Err(e) => diagnostics.push(format!(
        "[roles] {role}: skipping invalid address {entry:?} ({e})"
      )),
    }
  }
  out
}

fn validate_domain(d: &DomainConfig) -> Option<String> {
  if d.name.trim().is_empty() {
    return Some("name must not be empty".to_string());
  }
  if d.version.trim().is_empty() {
    return Some("version must not be empty".to_string());
  }
  if d.instance.is_zero() {
    return Some("instance must not be the zero address".to_string());
  }
  None
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn now_unix_s() -> u64 {
  crate::types::now_unix_ms() / 1000
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.domain, DomainConfig::default());
    assert!(path.exists());

    let reread = load_or_default_readonly(&path).unwrap();
    assert_eq!(reread.domain, cfg.domain);
    assert_eq!(reread.store, StoreConfig::default());
  }

  #[test]
  fn invalid_role_entries_are_skipped() {
    let file: ConfigFile = toml::from_str(
      r#"
[roles]
admins = ["0x00000000000000000000000000000000000000aa", "not-an-address"]
researchers = ["0x00000000000000000000000000000000000000bb"]
"#,
    )
    .unwrap();

    let cfg = file.normalize();
    assert_eq!(cfg.roles.admins.len(), 1);
    assert_eq!(cfg.roles.researchers.len(), 1);
    assert_eq!(cfg.roles.admins[0].0[19], 0xaa);
  }

  #[test]
  fn skipped_role_entries_are_reported() {
    let file: ConfigFile = toml::from_str(
      r#"
[roles]
admins = ["0x00000000000000000000000000000000000000aa", "0xdeadbeef"]
researchers = ["nobody"]
"#,
    )
    .unwrap();

    let cfg = file.normalize();
    assert_eq!(cfg.diagnostics.len(), 2);
    assert!(cfg.diagnostics[0].contains("admins") && cfg.diagnostics[0].contains("0xdeadbeef"));
    assert!(cfg.diagnostics[1].contains("researchers") && cfg.diagnostics[1].contains("nobody"));
  }

  #[test]
  fn clean_file_has_no_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let cfg = load_or_create_default(&path).unwrap();
    assert!(cfg.diagnostics.is_empty());
  }

  #[test]
  fn upgrade_fails_without_rewriting_when_backup_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("config.toml");
    assert!(upgrade_in_place(&path, &Config::default()).is_err());
    assert!(!path.exists());
  }

  #[test]
  fn zero_instance_falls_back_to_default_domain() {
    let file: ConfigFile = toml::from_str(
      r#"
[domain]
name = "Custom"
version = "7"
chain_id = 9
instance = "0x0000000000000000000000000000000000000000"
"#,
    )
    .unwrap();

    let cfg = file.normalize();
    assert_eq!(cfg.domain, DomainConfig::default());
    assert_eq!(cfg.diagnostics.len(), 1);
    assert!(cfg.diagnostics[0].contains("zero address"));
  }

  #[test]
  fn partial_file_is_upgraded_with_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.logging.level, "debug");

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("[domain]"));
    let backups = fs::read_dir(dir.path())
      .unwrap()
      .flatten()
      .filter(|e| e.file_name().to_string_lossy().starts_with("config.toml.bak-"))
      .count();
    assert_eq!(backups, 1);
  }

  #[test]
  fn unparseable_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "this is = = not toml").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.domain, DomainConfig::default());
    assert!(toml::from_str::<ConfigFile>(&fs::read_to_string(&path).unwrap()).is_ok());
  }
}
