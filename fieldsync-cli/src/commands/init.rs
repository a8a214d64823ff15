//! `fieldsync init [--force]`

use anyhow::{Context, Result};
use clap::Args;

use fieldsync_core::config;

/// Write the default configuration file.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config with the defaults.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = config::home().context("could not determine home directory")?;
        let path = config::config_path_at(&home);
        let existed = path.exists();

        let config = config::init_at(&home, self.force)
            .with_context(|| format!("failed to initialize {}", path.display()))?;

        if existed && !self.force {
            println!("✓ Config already present: {}", path.display());
        } else {
            println!("✓ Wrote {}", path.display());
        }
        println!("  Provider: {}", config.provider.base_url);
        println!("  Store:    {}", config.store.domain);
        Ok(())
    }
}
