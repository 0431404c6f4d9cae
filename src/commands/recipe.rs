// src/commands/recipe.rs
//! Recipe inspection commands: info and validate

use anyhow::Result;
use sous::host::HostOs;
use sous::recipe::cookbook::recipe_files;
use sous::recipe::kitchen::TransformRegistry;
use sous::recipe::model::PatchOrigin;
use sous::recipe::{lint_recipe, parse_recipe_file, Cookbook, Recipe};
use sous::Error;
use std::path::Path;

pub fn cmd_info(cookbook: &Cookbook, name: &str, json: bool) -> Result<()> {
    let recipe = cookbook.get(name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe_json(recipe))?);
        return Ok(());
    }

    println!("{} {}", recipe.name(), recipe.full_version());
    if let Some(description) = recipe.description() {
        println!("  {}", description);
    }
    if let Some(homepage) = recipe.homepage() {
        println!("Homepage: {}", homepage);
    }
    if let Some(license) = recipe.license() {
        println!("License: {}", license);
    }

    if let Some(source) = recipe.source() {
        println!("Source: {}", source.primary_url());
        for mirror in &source.urls()[1..] {
            println!("  mirror: {}", mirror);
        }
        println!("  checksum: {}", source.checksum());
    }
    if let Some(head) = recipe.head() {
        match &head.branch {
            Some(branch) => println!("Head: {} ({})", head.url, branch),
            None => println!("Head: {}", head.url),
        }
    }
    if let Some(livecheck) = recipe.livecheck() {
        println!("Livecheck: {}", livecheck.url());
    }

    if !recipe.dependencies().is_empty() {
        println!("Dependencies:");
        for dep in recipe.dependencies() {
            let provided = if dep.provided_on().is_empty() {
                String::new()
            } else {
                let hosts: Vec<String> = dep.provided_on().iter().map(|os| os.to_string()).collect();
                format!(", provided on {}", hosts.join(", "))
            };
            let inactive = if dep.applies_on(cookbook.os()) { "" } else { " [skipped on this host]" };
            println!("  {} ({}{}){}", dep.name(), dep.phase(), provided, inactive);
        }
    }

    if !recipe.patches().is_empty() {
        println!("Patches:");
        for patch in recipe.patches() {
            println!("  {} ({})", patch.name(), describe_origin(patch.origin()));
        }
    }

    if !recipe.transforms().is_empty() {
        println!("Transforms:");
        for transform in recipe.transforms() {
            match transform.only_on() {
                Some(cpu) => println!("  {} {} (only on {})", transform.hook(), transform.file(), cpu),
                None => println!("  {} {}", transform.hook(), transform.file()),
            }
        }
    }

    if !recipe.steps().is_empty() {
        println!("Steps:");
        for step in recipe.steps() {
            println!("  [{}] {} {}", step.phase(), step.program(), step.args().join(" "));
        }
    }

    Ok(())
}

fn describe_origin(origin: &PatchOrigin) -> String {
    match origin {
        PatchOrigin::Inline(_) => "inline".to_string(),
        PatchOrigin::File(path) => path.display().to_string(),
        PatchOrigin::Remote { url, .. } => url.clone(),
    }
}

fn recipe_json(recipe: &Recipe) -> serde_json::Value {
    serde_json::json!({
        "name": recipe.name(),
        "version": recipe.version(),
        "revision": recipe.revision(),
        "description": recipe.description(),
        "homepage": recipe.homepage(),
        "license": recipe.license(),
        "source": recipe.source().map(|s| serde_json::json!({
            "urls": s.urls(),
            "checksum": s.checksum().to_string(),
        })),
        "head": recipe.head().map(|h| serde_json::json!({ "url": h.url, "branch": h.branch })),
        "livecheck": recipe.livecheck().map(|l| l.url()),
        "dependencies": recipe.dependencies().iter().map(|d| serde_json::json!({
            "name": d.name(),
            "phase": d.phase(),
            "provided_on": d.provided_on(),
        })).collect::<Vec<_>>(),
        "patches": recipe.patches().iter().map(|p| serde_json::json!({
            "name": p.name(),
            "origin": describe_origin(p.origin()),
            "strip": p.strip(),
        })).collect::<Vec<_>>(),
        "transforms": recipe.transforms().iter().map(|t| serde_json::json!({
            "hook": t.hook(),
            "file": t.file(),
            "only_on": t.only_on(),
            "params": t.params(),
        })).collect::<Vec<_>>(),
        "env": recipe.env(),
        "variables": recipe.variables(),
        "steps": recipe.steps().iter().map(|s| serde_json::json!({
            "phase": s.phase(),
            "program": s.program(),
            "args": s.args(),
        })).collect::<Vec<_>>(),
    })
}

/// Validate every recipe file in `dir`, reporting all problems found
pub fn cmd_validate(dir: &Path, os: HostOs, strict: bool) -> Result<()> {
    let files = recipe_files(dir)?;
    println!("Validating {} recipe(s) in {}", files.len(), dir.display());

    let transforms = TransformRegistry::with_builtins();
    let mut recipes = Vec::new();
    let mut errors: Vec<Error> = Vec::new();
    let mut warning_count = 0;

    for path in &files {
        let recipe = match parse_recipe_file(path) {
            Ok(recipe) => recipe,
            Err(e) => {
                println!("[ERROR] {}: {}", path.display(), e);
                errors.push(e);
                continue;
            }
        };

        for transform in recipe.transforms() {
            if let Err(e) = transforms.validate(recipe.name(), transform) {
                println!("[ERROR] {}: {}", path.display(), e);
                errors.push(e);
            }
        }

        let stem = path.file_stem().and_then(|s| s.to_str());
        for warning in lint_recipe(&recipe, stem) {
            println!("Warning: {}: {}", recipe.name(), warning);
            warning_count += 1;
        }
        recipes.push(recipe);
    }

    match Cookbook::from_recipes(recipes, os) {
        Ok(cookbook) => {
            if let Err(e) = cookbook.graph().topological_sort() {
                println!("[ERROR] {}", e);
                errors.push(e);
            }
        }
        Err(e) => {
            println!("[ERROR] {}", e);
            errors.push(e);
        }
    }

    if strict && warning_count > 0 && errors.is_empty() {
        errors.push(Error::validation(
            dir.display().to_string(),
            format!("{} warning(s) in strict mode", warning_count),
        ));
    }

    if errors.is_empty() {
        println!("[OK] {} recipe(s) valid, {} warning(s)", files.len(), warning_count);
        return Ok(());
    }

    let count = errors.len();
    let first = errors.remove(0);
    Err(anyhow::Error::new(first).context(format!("{} problem(s) found", count)))
}
