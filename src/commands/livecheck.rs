// src/commands/livecheck.rs
//! Upstream version checks

use anyhow::Result;
use sous::cancel::CancelToken;
use sous::livecheck::{check, LivecheckResult};
use sous::recipe::kitchen::DefaultFetcher;
use sous::recipe::{Cookbook, KitchenConfig};
use tracing::warn;

pub fn cmd_livecheck(
    cookbook: &Cookbook,
    targets: &[String],
    config: &KitchenConfig,
    json: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let fetcher = DefaultFetcher::new(config.http_timeout)?;

    let names: Vec<String> = if targets.is_empty() {
        cookbook
            .recipes()
            .filter(|r| r.livecheck().is_some())
            .map(|r| r.name().to_string())
            .collect()
    } else {
        targets.to_vec()
    };

    let mut results: Vec<LivecheckResult> = Vec::new();
    let mut failures = 0;
    for name in &names {
        let recipe = cookbook.get(name)?;
        match check(recipe, &fetcher, cancel) {
            Ok(result) => {
                if !json {
                    print_result(&result);
                }
                results.push(result);
            }
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => {
                warn!("livecheck for {} failed: {}", name, e);
                if !json {
                    println!("{}: [ERROR] {}", name, e);
                }
                failures += 1;
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    if failures > 0 && results.is_empty() {
        anyhow::bail!("livecheck failed for every recipe");
    }
    Ok(())
}

fn print_result(result: &LivecheckResult) {
    match &result.latest {
        Some(latest) if result.outdated => {
            println!("{}: {} -> {}", result.recipe, result.current, latest)
        }
        Some(_) => println!("{}: {} (up to date)", result.recipe, result.current),
        None => println!("{}: {} (no upstream version matched)", result.recipe, result.current),
    }
}
