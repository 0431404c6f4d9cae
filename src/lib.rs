// src/lib.rs

//! sous: a declarative build-recipe engine
//!
//! Recipes describe how to build a piece of software from source: where the
//! source lives and its checksum, what it depends on, which patches to apply
//! and the ordered commands that configure, build and install it.
//!
//! # Architecture
//!
//! - Recipes: TOML files validated into an immutable model before any I/O
//! - Resolution: deterministic dependency order with cycle reporting
//! - Kitchen: fetch, verify, extract, patch and run steps for one recipe
//! - Scheduler: independent recipes build in parallel on a bounded pool
//! - Cancellation: one token observed by downloads and child processes

pub mod cancel;
mod error;
pub mod hash;
pub mod host;
pub mod livecheck;
pub mod progress;
pub mod recipe;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use hash::{Checksum, HashAlgorithm, Hasher};
pub use host::{CpuFamily, HostInfo, HostOs, TargetArch};
pub use recipe::{
    BuildReport, BuildState, CookResult, Cookbook, FailurePolicy, Kitchen, KitchenConfig, Recipe,
    Scheduler,
};
