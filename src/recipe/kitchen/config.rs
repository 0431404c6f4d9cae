// src/recipe/kitchen/config.rs

//! Configuration types for the Kitchen

use crate::error::{Error, Result};
use crate::recipe::kitchen::state::{BuildState, Transition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the Kitchen
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Installation prefix shared by every recipe in a run
    pub prefix: PathBuf,
    /// Parent directory for per-recipe working directories
    pub work_dir: PathBuf,
    /// Verified download cache (disabled when `None`)
    pub source_cache: Option<PathBuf>,
    /// Parallel jobs: concurrent recipes and `MAKEFLAGS=-jN`
    pub jobs: u32,
    /// Timeout for a single install step
    pub step_timeout: Duration,
    /// Timeout for a single HTTP request
    pub http_timeout: Duration,
    /// Attempts per source URL for transient network failures
    pub fetch_retries: u32,
    /// Base delay between fetch attempts, multiplied by the attempt number
    pub retry_delay: Duration,
    /// Keep the working directory after a successful build
    pub keep_workdir: bool,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);

        let source_cache = dirs::cache_dir().map(|dir| dir.join("sous").join("sources"));
        let prefix = dirs::data_local_dir()
            .map(|dir| dir.join("sous"))
            .unwrap_or_else(|| PathBuf::from("/usr/local"));

        Self {
            prefix,
            work_dir: std::env::temp_dir().join("sous-build"),
            source_cache,
            jobs,
            step_timeout: Duration::from_secs(3600), // 1 hour
            http_timeout: Duration::from_secs(300),
            fetch_retries: 3,
            retry_delay: Duration::from_millis(1000),
            keep_workdir: false,
        }
    }
}

impl KitchenConfig {
    pub fn with_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_source_cache(mut self, cache: Option<PathBuf>) -> Self {
        self.source_cache = cache;
        self
    }

    pub fn with_jobs(mut self, jobs: u32) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_keep_workdir(mut self, keep: bool) -> Self {
        self.keep_workdir = keep;
        self
    }
}

/// Optional overrides read from a TOML config file
///
/// ```toml
/// prefix = "/opt/sous"
/// jobs = 8
/// step_timeout_secs = 7200
/// keep_workdir = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub prefix: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub source_cache: Option<PathBuf>,
    /// Set to false to disable the download cache
    pub cache: Option<bool>,
    pub jobs: Option<u32>,
    pub step_timeout_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub fetch_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub keep_workdir: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::ParseError(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Apply every set field on top of `config`
    pub fn apply(&self, mut config: KitchenConfig) -> KitchenConfig {
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(work_dir) = &self.work_dir {
            config.work_dir = work_dir.clone();
        }
        if let Some(cache) = &self.source_cache {
            config.source_cache = Some(cache.clone());
        }
        if self.cache == Some(false) {
            config.source_cache = None;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs.max(1);
        }
        if let Some(secs) = self.step_timeout_secs {
            config.step_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.http_timeout_secs {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.fetch_retries {
            config.fetch_retries = retries.max(1);
        }
        if let Some(ms) = self.retry_delay_ms {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(keep) = self.keep_workdir {
            config.keep_workdir = keep;
        }
        config
    }
}

/// Result of cooking a recipe
#[derive(Debug, Clone, Serialize)]
pub struct CookResult {
    pub recipe: String,
    pub version: String,
    /// Final state (always `Done` for a returned result)
    pub state: BuildState,
    /// Every state change, in order
    pub history: Vec<Transition>,
    /// Regular files added to the prefix by this recipe
    pub installed_files: usize,
    /// Per-step logs; `None` once the working directory is removed
    pub log_dir: Option<PathBuf>,
    /// Whether the source archive came from the download cache
    pub from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kitchen_config_default() {
        let config = KitchenConfig::default();
        assert!(config.jobs > 0);
        assert_eq!(config.fetch_retries, 3);
        assert!(!config.keep_workdir);
    }

    #[test]
    fn test_builder_overrides() {
        let config = KitchenConfig::default()
            .with_prefix("/opt/sous")
            .with_jobs(0)
            .with_keep_workdir(true);
        assert_eq!(config.prefix, PathBuf::from("/opt/sous"));
        assert_eq!(config.jobs, 1);
        assert!(config.keep_workdir);
    }

    #[test]
    fn test_config_file_applies_set_fields() {
        let file: ConfigFile = toml::from_str(
            r#"
prefix = "/opt/sous"
jobs = 2
cache = false
step_timeout_secs = 10
"#,
        )
        .unwrap();

        let base = KitchenConfig::default().with_work_dir("/tmp/w");
        let config = file.apply(base);
        assert_eq!(config.prefix, PathBuf::from("/opt/sous"));
        assert_eq!(config.jobs, 2);
        assert!(config.source_cache.is_none());
        assert_eq!(config.step_timeout, Duration::from_secs(10));
        assert_eq!(config.work_dir, PathBuf::from("/tmp/w"));
    }

    #[test]
    fn test_config_file_rejects_unknown_keys() {
        assert!(toml::from_str::<ConfigFile>("use_isolation = true").is_err());
    }
}
