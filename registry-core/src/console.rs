use crate::access::{Role, StaticRoleOracle};
use crate::config::Config;
use crate::events;
use crate::paths;
use crate::registry::Registry;
use crate::signature::decode_signature;
use crate::types::{Address, IocType, ReportDraft, ReportId};
use anyhow::Context;
use std::fs;
use std::path::Path;

pub fn run_console_command(cfg: &Config, base: &Path, args: &[String]) -> anyhow::Result<()> {
  let args = args.get(1..).unwrap_or_default();

  if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(());
  }

  if let Some(i) = args.iter().position(|a| a == "--id") {
    return run_id(&args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--report") {
    return run_report(cfg, base, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--nonce") {
    return run_nonce(cfg, base, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--digest") {
    return run_digest(cfg, base, &args[i + 1..]);
  }

  if let Some(i) = args.iter().position(|a| a == "--submit") {
    return run_submit(cfg, base, &args[i + 1..], args);
  }

  if let Some(i) = args.iter().position(|a| a == "--deprecate") {
    return run_deprecate(cfg, base, &args[i + 1..], args);
  }

  if let Some(i) = args.iter().position(|a| a == "--events") {
    return run_events(cfg, base, &args[i + 1..]);
  }

  if args.iter().any(|a| a == "--roles") {
    print_roles(cfg);
    return Ok(());
  }

  eprintln!("Unknown command.");
  print_help();
  Ok(())
}

fn run_id(tail: &[String]) -> anyhow::Result<()> {
  let (Some(kind), Some(value)) = (tail.first(), tail.get(1)) else {
    anyhow::bail!("expected `--id <ioc-type> <value>`");
  };
  let ioc_type: IocType = kind.parse()?;
  println!("{}", ReportId::derive(ioc_type, value));
  Ok(())
}

fn run_report(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let id: ReportId = tail
    .first()
    .ok_or_else(|| anyhow::anyhow!("expected `--report <id>`"))?
    .parse()
    .context("parse report id")?;

  let registry = Registry::open_readonly(cfg, base)?;
  match registry.report(&id) {
    Some(report) => {
      println!("id = \"{id}\"");
      print!("{}", toml::to_string_pretty(&report)?);
    }
    None => println!("No report at {id}."),
  }
  Ok(())
}

fn run_nonce(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let who = parse_address_arg(tail.first(), "--nonce <address>")?;
  let registry = Registry::open_readonly(cfg, base)?;
  println!("{}", registry.nonce(&who));
  Ok(())
}

fn run_digest(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let draft = read_draft(tail.first(), "--digest <draft.toml>")?;
  let registry = Registry::open_readonly(cfg, base)?;
  let nonce = registry.nonce(&draft.reporter);
  let digest = registry.digest_for(&draft);
  println!("reporter = {}", draft.reporter);
  println!("nonce = {nonce}");
  println!("digest = 0x{}", hex::encode(digest));
  Ok(())
}

fn run_submit(cfg: &Config, base: &Path, tail: &[String], all: &[String]) -> anyhow::Result<()> {
  let draft = read_draft(tail.first(), "--submit <draft.toml> <signature> --caller <address>")?;
  let sig_arg = tail
    .get(1)
    .ok_or_else(|| anyhow::anyhow!("expected a signature after the draft path"))?;
  let signature = read_signature_arg(sig_arg)?;
  let caller = parse_address_arg(flag_value(all, "--caller"), "--caller <address>")?;

  let registry = Registry::open(cfg, base)?;
  let id = registry
    .submit(draft, &signature, &caller)
    .context("submit report")?;
  println!("Report stored: id={id}");
  Ok(())
}

fn run_deprecate(cfg: &Config, base: &Path, tail: &[String], all: &[String]) -> anyhow::Result<()> {
  let id: ReportId = tail
    .first()
    .ok_or_else(|| anyhow::anyhow!("expected `--deprecate <id> --caller <address>`"))?
    .parse()
    .context("parse report id")?;
  let caller = parse_address_arg(flag_value(all, "--caller"), "--caller <address>")?;

  let registry = Registry::open(cfg, base)?;
  registry.deprecate(&id, &caller).context("deprecate report")?;
  println!("Report deprecated: id={id}");
  Ok(())
}

fn run_events(cfg: &Config, base: &Path, tail: &[String]) -> anyhow::Result<()> {
  let limit = tail
    .first()
    .filter(|s| !s.starts_with("--"))
    .map(|s| s.parse::<usize>())
    .transpose()
    .context("parse event limit")?
    .unwrap_or(20);

  let recent = events::list_recent(&paths::event_log_path(base, cfg), limit)?;
  if recent.is_empty() {
    println!("No events recorded.");
    return Ok(());
  }
  for ev in recent {
    println!(
      "{} {} {} report={}",
      ev.emitted_at_unix_ms,
      ev.event_id,
      ev.kind.name(),
      ev.kind.report_id()
    );
  }
  Ok(())
}

fn print_roles(cfg: &Config) {
  let oracle = StaticRoleOracle::from_config(&cfg.roles);
  for role in [Role::Admin, Role::Researcher] {
    let members = oracle.members(role);
    println!("{role} ({}):", members.len());
    for m in members {
      println!("  {m}");
    }
  }
}

fn read_draft(arg: Option<&String>, usage: &str) -> anyhow::Result<ReportDraft> {
  let path = arg.ok_or_else(|| anyhow::anyhow!("expected `{usage}`"))?;
  let raw = fs::read_to_string(path).with_context(|| format!("read {path}"))?;
  toml::from_str(&raw).with_context(|| format!("parse draft {path}"))
}

fn read_signature_arg(arg: &str) -> anyhow::Result<Vec<u8>> {
  let p = Path::new(arg);
  if p.is_file() {
    let raw = fs::read(p).with_context(|| format!("read {}", p.display()))?;
    return decode_signature(&raw);
  }
  decode_signature(arg.as_bytes())
}

fn parse_address_arg(arg: Option<&String>, usage: &str) -> anyhow::Result<Address> {
  let raw = arg.ok_or_else(|| anyhow::anyhow!("expected `{usage}`"))?;
  raw
    .parse()
    .with_context(|| format!("invalid address: {raw}"))
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a String> {
  let i = args.iter().position(|a| a == flag)?;
  args.get(i + 1)
}

fn print_help() {
  println!(
    "ioc-registry\n\
     \n\
     Usage:\n\
     \x20 ioc-registry --id <ioc-type> <value>\n\
     \x20 ioc-registry --report <id>\n\
     \x20 ioc-registry --nonce <address>\n\
     \x20 ioc-registry --digest <draft.toml>\n\
     \x20 ioc-registry --submit <draft.toml> <signature|sig-file> --caller <address>\n\
     \x20 ioc-registry --deprecate <id> --caller <address>\n\
     \x20 ioc-registry --events [limit]\n\
     \x20 ioc-registry --roles\n\
     \n\
     IOC types: ip_address, domain_name, file_hash, wallet_address\n\
     State directory: ${} (default ./.ioc-registry)",
    paths::HOME_ENV
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn flag_value_reads_following_argument() {
    let a = args(&["--deprecate", "0x01", "--caller", "0xabc"]);
    assert_eq!(flag_value(&a, "--caller").map(String::as_str), Some("0xabc"));
    assert!(flag_value(&a, "--missing").is_none());
    assert!(flag_value(&args(&["--caller"]), "--caller").is_none());
  }

  #[test]
  fn signature_arg_may_be_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("report.sig");
    let sig = [0x42u8; 65];
    fs::write(&p, format!("0x{}\n", hex::encode(sig))).unwrap();

    let from_file = read_signature_arg(p.to_str().unwrap()).unwrap();
    let inline = read_signature_arg(&format!("0x{}", hex::encode(sig))).unwrap();
    assert_eq!(from_file, sig.to_vec());
    assert_eq!(inline, sig.to_vec());
  }

  #[test]
  fn draft_file_must_parse() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("draft.toml");
    fs::write(&p, "reporter = \"0x01\"\n").unwrap();
    let arg = p.to_string_lossy().to_string();
    assert!(read_draft(Some(&arg), "usage").is_err());
    assert!(read_draft(None, "usage").is_err());
  }
}
