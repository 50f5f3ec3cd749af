use crate::{Result, config::Config};

/// Prints the merged configuration in the same TOML shape the loader reads.
pub fn execute(cfg: &Config) -> Result<()> {
   print!("{}", toml::to_string_pretty(cfg)?);
   Ok(())
}
