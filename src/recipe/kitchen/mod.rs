// src/recipe/kitchen/mod.rs

//! Kitchen: where a single recipe is cooked
//!
//! The Kitchen owns everything a build needs besides the recipe itself:
//! - The install prefix and work directory layout
//! - The source fetcher (HTTP, local files, or a test double)
//! - The registry of source transform hooks
//! - The observer that hears about every state change
//!
//! Cooking walks the recipe through `Pending -> Fetched -> Patched ->
//! Configuring -> Building -> Installing -> Done`. Any failure moves it to
//! `Failed` and leaves the working directory in place for inspection.

pub mod archive;
mod config;
mod cook;
pub mod fetch;
pub mod patch;
pub mod state;
pub mod transform;

pub use config::{ConfigFile, CookResult, KitchenConfig};
pub use cook::{BuildContext, ResolvedStep};
pub use fetch::{DefaultFetcher, FetchOptions, FetchedFile, SourceFetcher};
pub use state::{BuildObserver, BuildState, BuildTracker, NoopObserver, Transition};
pub use transform::{SourceTransform, TransformRegistry};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::host::HostInfo;
use crate::recipe::model::Recipe;
use cook::Cook;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The Kitchen: where recipes are cooked
pub struct Kitchen {
    config: KitchenConfig,
    host: HostInfo,
    fetcher: Arc<dyn SourceFetcher>,
    transforms: TransformRegistry,
    observer: Arc<dyn BuildObserver>,
}

impl Kitchen {
    /// Create a Kitchen that downloads over HTTP(S) and from local paths
    pub fn new(config: KitchenConfig, host: HostInfo) -> Result<Self> {
        let fetcher = Arc::new(DefaultFetcher::new(config.http_timeout)?);
        Ok(Self::with_fetcher(config, host, fetcher))
    }

    /// Create a Kitchen with a custom source fetcher
    pub fn with_fetcher(
        config: KitchenConfig,
        host: HostInfo,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            config,
            host,
            fetcher,
            transforms: TransformRegistry::with_builtins(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn fetcher(&self) -> &dyn SourceFetcher {
        self.fetcher.as_ref()
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    pub fn observer(&self) -> Arc<dyn BuildObserver> {
        Arc::clone(&self.observer)
    }

    /// Working directory used for `recipe`
    pub fn work_dir_for(&self, recipe: &Recipe) -> PathBuf {
        self.config
            .work_dir
            .join(format!("{}-{}", recipe.name(), recipe.full_version()))
    }

    /// Checks that need the Kitchen but no I/O: transform hooks and their parameters
    pub fn preflight(&self, recipe: &Recipe) -> Result<()> {
        for transform in recipe.transforms() {
            self.transforms.validate(recipe.name(), transform)?;
        }
        Ok(())
    }

    /// Cook a recipe: fetch, extract, patch, then run its steps
    pub fn cook(&self, recipe: &Recipe, cancel: &CancelToken) -> Result<CookResult> {
        info!("Cooking {} {}", recipe.name(), recipe.full_version());
        let mut tracker = BuildTracker::new(recipe.name(), Arc::clone(&self.observer));

        if let Err(e) = self.preflight(recipe) {
            return Err(tracker.fail(e));
        }

        let mut cook = match Cook::new(self, recipe, cancel) {
            Ok(cook) => cook,
            Err(e) => return Err(tracker.fail(e)),
        };

        if let Err(e) = cook.run(&mut tracker) {
            warn!(
                "{} failed; work directory kept at {}",
                recipe.name(),
                cook.work_dir().display()
            );
            return Err(tracker.fail(e));
        }

        let log_dir = if self.config.keep_workdir {
            Some(cook.log_dir())
        } else {
            debug!("Removing work directory {}", cook.work_dir().display());
            if let Err(e) = fs::remove_dir_all(cook.work_dir()) {
                warn!("Failed to remove {}: {}", cook.work_dir().display(), e);
            }
            None
        };

        info!("Cooked {} {}", recipe.name(), recipe.full_version());
        Ok(CookResult {
            recipe: recipe.name().to_string(),
            version: recipe.full_version(),
            state: tracker.state(),
            installed_files: cook.installed_files,
            from_cache: cook.from_cache,
            log_dir,
            history: tracker.into_history(),
        })
    }

    /// Download and verify a recipe's source into `dest_dir` without building
    ///
    /// Returns `None` for recipes without a source archive.
    pub fn fetch(
        &self,
        recipe: &Recipe,
        dest_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<FetchedFile>> {
        let Some(source) = recipe.source() else {
            return Ok(None);
        };

        let options = FetchOptions {
            retries: self.config.fetch_retries,
            retry_delay: self.config.retry_delay,
            cache_dir: self.config.source_cache.clone(),
        };
        let fetched = fetch::fetch_verified(
            self.fetcher(),
            source.urls(),
            source.checksum(),
            &dest_dir.join(source.filename()),
            &options,
            cancel,
        )?;
        Ok(Some(fetched))
    }

    /// Everything `cook` would do, resolved but not executed
    pub fn plan(&self, recipe: &Recipe) -> Result<BuildPlan> {
        self.preflight(recipe)?;

        let work_dir = self.work_dir_for(recipe);
        let source_dir = match recipe.source() {
            Some(source) => match source.extract_dir() {
                Some(dir) => work_dir.join("src").join(dir),
                None => work_dir.join("src").join(format!("{}-{}", recipe.name(), recipe.version())),
            },
            None => work_dir.join("src"),
        };
        let context = BuildContext::new(self, recipe, &work_dir, &source_dir)?;

        let steps = recipe
            .steps()
            .iter()
            .map(|step| context.resolve_step(recipe.name(), step))
            .collect::<Result<Vec<_>>>()?;

        Ok(BuildPlan {
            recipe: recipe.name().to_string(),
            version: recipe.full_version(),
            urls: recipe
                .source()
                .map(|s| s.urls().to_vec())
                .unwrap_or_default(),
            patches: recipe.patches().iter().map(|p| p.name().to_string()).collect(),
            transforms: recipe
                .transforms()
                .iter()
                .filter(|t| t.applies_to(self.host.cpu))
                .map(|t| format!("{} {}", t.hook(), t.file()))
                .collect(),
            work_dir,
            env: context.env,
            steps,
        })
    }
}

/// A dry-run view of one recipe build
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub recipe: String,
    pub version: String,
    pub urls: Vec<String>,
    pub patches: Vec<String>,
    /// Transforms that apply on this host
    pub transforms: Vec<String>,
    pub work_dir: PathBuf,
    pub env: std::collections::BTreeMap<String, String>,
    pub steps: Vec<ResolvedStep>,
}
