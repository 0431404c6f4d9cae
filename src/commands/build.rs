// src/commands/build.rs
//! Build, resolve and fetch commands

use super::progress::build_observer;
use anyhow::{Context, Result};
use sous::cancel::CancelToken;
use sous::host::HostInfo;
use sous::recipe::scheduler::RecipeOutcome;
use sous::recipe::{Cookbook, FailurePolicy, Kitchen, KitchenConfig, Scheduler};
use sous::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Flags of the `build` command
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub prefix: Option<PathBuf>,
    pub jobs: Option<u32>,
    pub dry_run: bool,
    pub keep_going: bool,
    pub keep_workdir: bool,
    pub step_timeout: Option<u64>,
    pub json: bool,
}

impl BuildOptions {
    fn apply(&self, mut config: KitchenConfig) -> KitchenConfig {
        if let Some(prefix) = &self.prefix {
            config = config.with_prefix(prefix);
        }
        if let Some(jobs) = self.jobs {
            config = config.with_jobs(jobs);
        }
        if let Some(secs) = self.step_timeout {
            config = config.with_step_timeout(Duration::from_secs(secs));
        }
        if self.keep_workdir {
            config = config.with_keep_workdir(true);
        }
        config
    }
}

pub fn cmd_build(
    cookbook: &Cookbook,
    targets: &[String],
    config: KitchenConfig,
    host: HostInfo,
    options: &BuildOptions,
    cancel: &CancelToken,
) -> Result<()> {
    let config = options.apply(config);
    let order = cookbook.resolve(targets)?;

    if options.dry_run {
        let kitchen = Kitchen::new(config, host)?;
        return print_plan(&kitchen, cookbook, &order, options.json);
    }

    if !options.json {
        println!("Build order: {}", order.join(" -> "));
        println!(
            "Installing into {} with {} job(s)",
            config.prefix.display(),
            config.jobs
        );
    }

    std::fs::create_dir_all(&config.prefix)
        .with_context(|| format!("Failed to create prefix: {}", config.prefix.display()))?;

    let kitchen = Kitchen::new(config, host)?.with_observer(build_observer(options.json));
    let policy = if options.keep_going {
        FailurePolicy::KeepGoing
    } else {
        FailurePolicy::FailFast
    };

    let report = Scheduler::new(&kitchen, policy).run(cookbook, targets, cancel)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report.order, &report.outcomes))?);
    } else {
        println!();
        for name in &report.order {
            match report.outcome(name) {
                Some(RecipeOutcome::Built(result)) => {
                    let cached = if result.from_cache { ", cached source" } else { "" };
                    println!(
                        "[OK] {} {} ({} file(s){})",
                        result.recipe, result.version, result.installed_files, cached
                    );
                }
                Some(RecipeOutcome::Failed(e)) if matches!(e.root(), Error::DependencyFailed(_)) => {
                    println!("[SKIPPED] {}: {}", name, e.root());
                }
                Some(RecipeOutcome::Failed(e)) => {
                    println!("[FAILED] {}", e);
                    print_failure_details(&kitchen, cookbook, name, e);
                }
                Some(RecipeOutcome::NotStarted) | None => println!("[NOT STARTED] {}", name),
            }
        }
    }

    let built = report.built().len();
    let total = report.order.len();
    match report.into_error() {
        None => {
            info!("Built {} recipe(s)", built);
            if !options.json {
                println!("\n[COMPLETE] Built {} recipe(s)", built);
            }
            Ok(())
        }
        Some(error) => Err(anyhow::Error::new(error)
            .context(format!("Build failed ({} of {} recipe(s) built)", built, total))),
    }
}

fn print_failure_details(kitchen: &Kitchen, cookbook: &Cookbook, name: &str, error: &Error) {
    if let Error::Build { output, .. } = error.root()
        && !output.is_empty()
    {
        println!("  Last output:");
        for line in output {
            println!("    {}", line);
        }
    }

    if let Ok(recipe) = cookbook.get(name) {
        let work_dir = kitchen.work_dir_for(recipe);
        if work_dir.exists() {
            println!("  Work directory kept at {}", work_dir.display());
        }
    }
}

fn report_json(
    order: &[String],
    outcomes: &std::collections::BTreeMap<String, RecipeOutcome>,
) -> serde_json::Value {
    let recipes: Vec<serde_json::Value> = order
        .iter()
        .map(|name| match outcomes.get(name) {
            Some(RecipeOutcome::Built(result)) => serde_json::json!({
                "recipe": name,
                "status": "done",
                "result": result,
            }),
            Some(RecipeOutcome::Failed(e)) => serde_json::json!({
                "recipe": name,
                "status": "failed",
                "error": e.to_string(),
                "exit_code": e.exit_code(),
            }),
            Some(RecipeOutcome::NotStarted) | None => serde_json::json!({
                "recipe": name,
                "status": "not-started",
            }),
        })
        .collect();
    serde_json::json!({ "order": order, "recipes": recipes })
}

fn print_plan(kitchen: &Kitchen, cookbook: &Cookbook, order: &[String], json: bool) -> Result<()> {
    let plans = order
        .iter()
        .map(|name| kitchen.plan(cookbook.get(name)?))
        .collect::<sous::Result<Vec<_>>>()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    println!("Dry run: {} recipe(s) would be built", plans.len());
    for plan in &plans {
        println!("\n==> {} {}", plan.recipe, plan.version);
        for url in &plan.urls {
            println!("  fetch     {}", url);
        }
        for patch in &plan.patches {
            println!("  patch     {}", patch);
        }
        for transform in &plan.transforms {
            println!("  transform {}", transform);
        }
        for step in &plan.steps {
            println!("  {:<9} {}", step.phase.to_string(), step.command_line());
        }
        for (key, value) in &plan.env {
            if key != "PATH" && key != "PKG_CONFIG_PATH" {
                println!("  env       {}={}", key, value);
            }
        }
    }
    Ok(())
}

pub fn cmd_resolve(cookbook: &Cookbook, targets: &[String]) -> Result<()> {
    let order = cookbook.resolve(targets)?;
    for (i, name) in order.iter().enumerate() {
        let recipe = cookbook.get(name)?;
        println!("{:>3}. {} {}", i + 1, name, recipe.full_version());
    }
    Ok(())
}

pub fn cmd_fetch(
    cookbook: &Cookbook,
    targets: &[String],
    config: KitchenConfig,
    host: HostInfo,
    dest: &Path,
    cancel: &CancelToken,
) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;
    let kitchen = Kitchen::new(config, host)?;

    for name in targets {
        let recipe = cookbook.get(name)?;
        match kitchen.fetch(recipe, dest, cancel)? {
            Some(fetched) => {
                let origin = if fetched.from_cache { "cache" } else { "network" };
                println!(
                    "[OK] {}: {} ({} bytes, from {})",
                    name,
                    fetched.path.display(),
                    fetched.bytes,
                    origin
                );
            }
            None => println!("[OK] {}: no source archive", name),
        }
    }
    Ok(())
}
