// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Recipe names taken by several subcommands
fn recipes_arg(required: bool) -> Arg {
    Arg::new("recipes")
        .required(required)
        .num_args(1..)
        .help("Recipe names")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Print as JSON")
}

fn build_cli() -> Command {
    Command::new("sous")
        .version(env!("CARGO_PKG_VERSION"))
        .author("sous contributors")
        .about("Build software from declarative recipes")
        .subcommand_required(true)
        .arg(
            Arg::new("recipes_dir")
                .long("recipes")
                .global(true)
                .default_value("recipes")
                .help("Directory containing recipe files"),
        )
        .arg(Arg::new("work_dir").long("work-dir").global(true).help("Parent directory for build working directories"))
        .arg(Arg::new("cache_dir").long("cache-dir").global(true).help("Verified download cache directory"))
        .arg(
            Arg::new("no_cache")
                .long("no-cache")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Disable the download cache"),
        )
        .arg(Arg::new("config").long("config").global(true).help("Configuration file (TOML)"))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Verbose output (debug logging)"),
        )
        .subcommand(
            Command::new("build")
                .about("Build recipes and everything they depend on")
                .arg(recipes_arg(true))
                .arg(Arg::new("prefix").long("prefix").help("Installation prefix"))
                .arg(
                    Arg::new("jobs")
                        .short('j')
                        .long("jobs")
                        .help("Parallel jobs (concurrent recipes and make -j)"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Show what would be done without doing it"),
                )
                .arg(
                    Arg::new("keep_going")
                        .short('k')
                        .long("keep-going")
                        .action(ArgAction::SetTrue)
                        .help("Keep building independent recipes after a failure"),
                )
                .arg(
                    Arg::new("keep_workdir")
                        .long("keep-workdir")
                        .action(ArgAction::SetTrue)
                        .help("Keep working directories of successful builds"),
                )
                .arg(Arg::new("step_timeout").long("step-timeout").help("Per-step timeout in seconds"))
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("resolve")
                .about("Print the order recipes would be built in")
                .arg(recipes_arg(true)),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download and verify a recipe's source without building")
                .arg(recipes_arg(true))
                .arg(
                    Arg::new("dest")
                        .short('d')
                        .long("dest")
                        .default_value(".")
                        .help("Directory to place the archives in"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Show recipe metadata")
                .arg(Arg::new("recipe").required(true).help("Recipe name"))
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate every recipe in the recipe directory")
                .arg(
                    Arg::new("strict")
                        .long("strict")
                        .action(ArgAction::SetTrue)
                        .help("Treat lint warnings as errors"),
                ),
        )
        .subcommand(
            Command::new("livecheck")
                .about("Check upstream for newer versions")
                .arg(recipes_arg(false))
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("sous.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
