// src/cli/mod.rs
//! CLI definitions for sous
//!
//! Commands:
//! - `build` - Build recipes and their dependencies into the prefix
//! - `resolve` - Print the build order
//! - `fetch` - Download and verify sources only
//! - `info` - Show recipe metadata
//! - `validate` - Validate every recipe in the recipe directory
//! - `livecheck` - Report newer upstream versions
//! - `completions` - Generate shell completions
//!
//! The command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sous")]
#[command(author = "sous contributors")]
#[command(version)]
#[command(about = "Build software from declarative recipes", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Directory containing recipe files
    #[arg(
        long = "recipes",
        value_name = "DIR",
        global = true,
        env = "SOUS_RECIPES",
        default_value = "recipes"
    )]
    pub recipes_dir: PathBuf,

    /// Parent directory for build working directories
    #[arg(long, global = true, env = "SOUS_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Verified download cache directory
    #[arg(long, global = true, env = "SOUS_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Disable the download cache
    #[arg(long, global = true, conflicts_with = "cache_dir")]
    pub no_cache: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "SOUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build recipes and everything they depend on
    Build {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,

        /// Installation prefix
        #[arg(long)]
        prefix: Option<PathBuf>,

        /// Parallel jobs (concurrent recipes and make -j)
        #[arg(short, long)]
        jobs: Option<u32>,

        /// Show what would be done without doing it
        #[arg(long)]
        dry_run: bool,

        /// Keep building independent recipes after a failure
        #[arg(short, long)]
        keep_going: bool,

        /// Keep working directories of successful builds
        #[arg(long)]
        keep_workdir: bool,

        /// Per-step timeout in seconds
        #[arg(long, value_name = "SECS")]
        step_timeout: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the order recipes would be built in
    Resolve {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,
    },

    /// Download and verify a recipe's source without building
    Fetch {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,

        /// Directory to place the archives in
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },

    /// Show recipe metadata
    Info {
        /// Recipe name
        recipe: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate every recipe in the recipe directory
    Validate {
        /// Treat lint warnings as errors
        #[arg(long)]
        strict: bool,
    },

    /// Check upstream for newer versions
    Livecheck {
        /// Recipe names (defaults to every recipe with a livecheck)
        recipes: Vec<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_flags() {
        let cli = Cli::try_parse_from([
            "sous", "--recipes", "/r", "build", "qemu", "--jobs", "8", "--keep-going",
        ])
        .unwrap();
        assert_eq!(cli.global.recipes_dir, PathBuf::from("/r"));
        match cli.command {
            Commands::Build {
                recipes,
                jobs,
                keep_going,
                dry_run,
                ..
            } => {
                assert_eq!(recipes, vec!["qemu"]);
                assert_eq!(jobs, Some(8));
                assert!(keep_going);
                assert!(!dry_run);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sous", "validate", "-v", "--no-cache"]).unwrap();
        assert!(cli.global.verbose);
        assert!(cli.global.no_cache);
    }

    #[test]
    fn test_build_requires_recipe() {
        assert!(Cli::try_parse_from(["sous", "build"]).is_err());
    }
}
