// src/recipe/mod.rs

//! Recipe system for building software from source
//!
//! Recipes define how to build a piece of software, including:
//! - The source archive and its checksum
//! - Dependencies on other recipes
//! - Patches and source transforms to apply
//! - The ordered install steps (configure, make, install)
//!
//! # Culinary Terminology
//!
//! - **Recipe**: The build specification (like a recipe card)
//! - **Cookbook**: Every recipe in a recipe directory
//! - **Kitchen**: The environment a recipe is cooked in
//! - **Cook**: Build one recipe
//! - **Prep**: Fetch and verify sources
//! - **Simmer**: Run the install steps
//!
//! # Example Recipe
//!
//! ```toml
//! name = "libslirp"
//! description = "General purpose TCP-IP emulator"
//! license = "BSD-3-Clause"
//!
//! [source]
//! url = "https://gitlab.freedesktop.org/slirp/libslirp/-/archive/v4.8.0/libslirp-v4.8.0.tar.gz"
//! checksum = "sha256:2a98852e65666db313481d1bd8ee4ae4f4d8f4fc9ca2bb7c3fa4bda7adc5a5fd"
//!
//! [[dependency]]
//! name = "glib"
//!
//! [[dependency]]
//! name = "meson"
//! phase = "build"
//!
//! [[step]]
//! program = "meson"
//! args = ["setup", "build", "--prefix=$PREFIX"]
//!
//! [[step]]
//! program = "meson"
//! args = ["install", "-C", "build"]
//! ```

pub mod cookbook;
pub mod format;
pub mod graph;
pub mod interpolate;
pub mod kitchen;
pub mod model;
pub mod parser;
pub mod scheduler;

pub use cookbook::Cookbook;
pub use graph::RecipeGraph;
pub use kitchen::{BuildState, CookResult, Kitchen, KitchenConfig};
pub use model::Recipe;
pub use parser::{lint_recipe, parse_recipe, parse_recipe_file};
pub use scheduler::{BuildReport, FailurePolicy, RecipeOutcome, Scheduler};
