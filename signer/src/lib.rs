use anyhow::Context;
use k256::ecdsa::SigningKey;
use rand_core::OsRng;
use registry_core::config;
use registry_core::digest::{canonical_digest, DomainSeparator};
use registry_core::paths;
use registry_core::signature::{address_of, sign_digest, signing_key_from_hex, SIGNATURE_LEN};
use registry_core::types::{Address, ReportDraft};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Keygen {
    key_path: PathBuf,
  },
  Address {
    key_path: PathBuf,
  },
  Sign {
    draft_path: PathBuf,
    key_path: PathBuf,
    nonce: u64,
    config_path: Option<PathBuf>,
  },
}

impl Command {
  pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
    if let Some(path) = flag_value(args, "--keygen") {
      return Ok(Self::Keygen {
        key_path: PathBuf::from(path),
      });
    }
    if let Some(path) = flag_value(args, "--address") {
      return Ok(Self::Address {
        key_path: PathBuf::from(path),
      });
    }
    if let Some(path) = flag_value(args, "--sign") {
      let key = flag_value(args, "--key")
        .ok_or_else(|| anyhow::anyhow!("`--sign` requires `--key <key-file>`"))?;
      let nonce = flag_value(args, "--nonce")
        .ok_or_else(|| anyhow::anyhow!("`--sign` requires `--nonce <n>`"))?
        .parse::<u64>()
        .context("parse --nonce")?;
      return Ok(Self::Sign {
        draft_path: PathBuf::from(path),
        key_path: PathBuf::from(key),
        nonce,
        config_path: flag_value(args, "--config").map(PathBuf::from),
      });
    }
    Err(anyhow::anyhow!(
      "expected `--keygen <key-file>`, `--address <key-file>` or `--sign <draft.toml> --key <key-file> --nonce <n>`"
    ))
  }
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_ansi(false)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  match cmd {
    Command::Keygen { key_path } => {
      let address = keygen(&key_path)?;
      println!("{address}");
    }
    Command::Address { key_path } => {
      let key = load_key(&key_path)?;
      println!("{}", address_of(key.verifying_key()));
    }
    Command::Sign {
      draft_path,
      key_path,
      nonce,
      config_path,
    } => {
      let cfg_path = match config_path {
        Some(p) => p,
        None => paths::config_path(&paths::base_dir()?),
      };
      let cfg = config::load_or_default_readonly(&cfg_path)?;
      registry_core::logging::report_config_diagnostics(&cfg);
      let domain = DomainSeparator::from_config(&cfg.domain);

      let raw = fs::read_to_string(&draft_path)
        .with_context(|| format!("read {}", draft_path.display()))?;
      let draft: ReportDraft = toml::from_str(&raw).context("parse draft")?;
      let key = load_key(&key_path)?;

      let sig = sign_draft(&domain, &key, &draft, nonce)?;
      tracing::info!(
        reporter = %draft.reporter,
        report_id = %draft.report_id(),
        nonce,
        "draft signed"
      );
      println!("0x{}", hex::encode(sig));
    }
  }
  Ok(())
}

/// Creates a new key file. Never overwrites an existing one.
pub fn keygen(path: &Path) -> anyhow::Result<Address> {
  if path.exists() {
    anyhow::bail!("refusing to overwrite existing key file {}", path.display());
  }
  if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
  }

  let key = SigningKey::random(&mut OsRng);
  fs::write(path, format!("{}\n", hex::encode(key.to_bytes())))
    .with_context(|| format!("write {}", path.display()))?;
  restrict_permissions(path)?;

  Ok(address_of(key.verifying_key()))
}

pub fn load_key(path: &Path) -> anyhow::Result<SigningKey> {
  let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
  signing_key_from_hex(&raw)
}

/// Signs `draft` at `nonce`. The draft's reporter must be the key's address.
pub fn sign_draft(
  domain: &DomainSeparator,
  key: &SigningKey,
  draft: &ReportDraft,
  nonce: u64,
) -> anyhow::Result<[u8; SIGNATURE_LEN]> {
  let signer = address_of(key.verifying_key());
  if draft.reporter != signer {
    anyhow::bail!(
      "draft reporter {} does not match key address {signer}",
      draft.reporter
    );
  }
  sign_digest(key, &canonical_digest(domain, draft, nonce))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o600))
    .with_context(|| format!("restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
  Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
  let i = args.iter().position(|a| a == flag)?;
  args.get(i + 1).map(String::as_str)
}
