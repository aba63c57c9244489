pub mod add;
pub mod clean;
pub mod init;
pub mod list;
pub mod remove;

use crate::output;
use std::path::PathBuf;
use wpfleet_core::config::{Config, WarnLevel};
use wpfleet_core::executor::ProcessExecutor;
use wpfleet_core::paths;

/// Global flags every command sees.
pub struct Context<'a> {
    pub root: PathBuf,
    pub env: String,
    pub exec: &'a dyn ProcessExecutor,
    pub json: bool,
    pub yes: bool,
}

/// Print config warnings; error-level findings abort the command.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    for warning in config.validate() {
        match warning.level {
            WarnLevel::Warning => output::warn(&warning.message),
            WarnLevel::Error => errors.push(warning.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid {}: {}", paths::CONFIG_FILE, errors.join("; "));
    }
    Ok(())
}
