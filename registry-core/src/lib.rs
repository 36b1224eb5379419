pub mod access;
pub mod config;
pub mod console;
pub mod digest;
pub mod error;
pub mod events;
pub mod logging;
pub mod paths;
pub mod registry;
pub mod signature;
pub mod store;
pub mod types;

pub use error::{RegistryError, SignatureError, StoreError};
pub use registry::Registry;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let cfg = config::load_or_create_default(&config_path)?;

  let output = if args.iter().any(|a| a == "--quiet") {
    logging::Output::FileOnly
  } else {
    logging::Output::FileAndStderr
  };
  logging::init(&base, &cfg, output)?;

  console::run_console_command(&cfg, &base, args)
}
