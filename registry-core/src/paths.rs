use crate::config::Config;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "IOC_REGISTRY_HOME";
pub const LOG_LEVEL_ENV: &str = "IOC_REGISTRY_LOG";
pub const LOG_FILE_NAME: &str = "ioc-registry.log";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(home) = std::env::var(HOME_ENV) {
    if !home.trim().is_empty() {
      return Ok(PathBuf::from(home));
    }
  }
  Ok(std::env::current_dir()?.join(".ioc-registry"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn state_path(base: &Path, cfg: &Config) -> PathBuf {
  base.join(&cfg.store.state_file)
}

pub fn event_log_path(base: &Path, cfg: &Config) -> PathBuf {
  base.join(&cfg.store.event_log)
}
