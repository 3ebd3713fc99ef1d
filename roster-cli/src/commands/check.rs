//! `roster check` — validate a config file and print the effective settings.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use roster_core::Config;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the YAML configuration file.
    #[arg(long, short)]
    pub config: PathBuf,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let config = Config::load(&self.config)
            .with_context(|| format!("invalid configuration at {}", self.config.display()))?;

        println!("{}: OK", self.config.display());
        println!("  base group:     {}", config.source.base_group);
        println!("  elevated group: {}", config.source.elevated_group);
        println!("  organization:   {}", config.target.organization);
        println!(
            "  sync:           dry_run={} ignore_suspended={} remove_extra_members={}",
            config.sync.dry_run, config.sync.ignore_suspended, config.sync.remove_extra_members
        );
        if config.store.enabled {
            println!(
                "  store:          {} (ttl {} days)",
                config.store.path.display(),
                config.store.ttl_days
            );
        } else {
            println!("  store:          disabled");
        }
        Ok(())
    }
}
