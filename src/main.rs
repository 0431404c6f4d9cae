// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser};
use sous::cancel::CancelToken;
use sous::host::HostInfo;
use std::process::ExitCode;
use tracing::{debug, warn};

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let cancel = CancelToken::new();
    watch_ctrl_c(cancel.clone());

    match run(cli, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(cli: Cli, cancel: &CancelToken) -> Result<()> {
    let global = cli.global;
    let host = HostInfo::detect();
    debug!("Host: {} {} (cc: {})", host.cpu, host.os, host.cc);

    match cli.command {
        Commands::Build {
            recipes,
            prefix,
            jobs,
            dry_run,
            keep_going,
            keep_workdir,
            step_timeout,
            json,
        } => {
            let config = commands::kitchen_config(&global)?;
            let cookbook = commands::load_cookbook(&global, &host)?;
            let options = commands::BuildOptions {
                prefix,
                jobs,
                dry_run,
                keep_going,
                keep_workdir,
                step_timeout,
                json,
            };
            commands::cmd_build(&cookbook, &recipes, config, host, &options, cancel)
        }
        Commands::Resolve { recipes } => {
            let cookbook = commands::load_cookbook(&global, &host)?;
            commands::cmd_resolve(&cookbook, &recipes)
        }
        Commands::Fetch { recipes, dest } => {
            let config = commands::kitchen_config(&global)?;
            let cookbook = commands::load_cookbook(&global, &host)?;
            commands::cmd_fetch(&cookbook, &recipes, config, host, &dest, cancel)
        }
        Commands::Info { recipe, json } => {
            let cookbook = commands::load_cookbook(&global, &host)?;
            commands::cmd_info(&cookbook, &recipe, json)
        }
        Commands::Validate { strict } => commands::cmd_validate(&global.recipes_dir, host.os, strict),
        Commands::Livecheck { recipes, json } => {
            let config = commands::kitchen_config(&global)?;
            let cookbook = commands::load_cookbook(&global, &host)?;
            commands::cmd_livecheck(&cookbook, &recipes, &config, json, cancel)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "sous", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Exit code of the library error behind `err`, or 1
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<sous::Error>())
        .map(|e| e.exit_code())
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

/// Raise `cancel` on Ctrl-C
fn watch_ctrl_c(cancel: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("sous-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Ctrl-C handling unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling build...");
                    cancel.cancel();
                }
            });
        });

    if let Err(e) = spawned {
        warn!("Failed to start signal thread: {}", e);
    }
}
