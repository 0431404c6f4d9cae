// src/commands/mod.rs
//! Command handlers for the sous CLI

mod build;
mod livecheck;
pub mod progress;
mod recipe;

pub use build::{cmd_build, cmd_fetch, cmd_resolve, BuildOptions};
pub use livecheck::cmd_livecheck;
pub use recipe::{cmd_info, cmd_validate};

use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use sous::host::HostInfo;
use sous::recipe::kitchen::ConfigFile;
use sous::recipe::{Cookbook, KitchenConfig};
use tracing::debug;

/// Kitchen configuration from defaults, then the config file, then flags
pub fn kitchen_config(global: &GlobalArgs) -> Result<KitchenConfig> {
    let mut config = KitchenConfig::default();

    if let Some(path) = &global.config {
        let file = ConfigFile::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?;
        config = file.apply(config);
        debug!("Loaded configuration from {}", path.display());
    }

    if let Some(work_dir) = &global.work_dir {
        config = config.with_work_dir(work_dir);
    }
    if let Some(cache_dir) = &global.cache_dir {
        config = config.with_source_cache(Some(cache_dir.clone()));
    }
    if global.no_cache {
        config = config.with_source_cache(None);
    }

    Ok(config)
}

/// Load every recipe in the recipe directory
pub fn load_cookbook(global: &GlobalArgs, host: &HostInfo) -> Result<Cookbook> {
    let cookbook = Cookbook::load_dir(&global.recipes_dir, host.os)?;
    debug!(
        "Loaded {} recipe(s) from {}",
        cookbook.len(),
        global.recipes_dir.display()
    );
    Ok(cookbook)
}
