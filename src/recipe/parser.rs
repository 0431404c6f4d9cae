// src/recipe/parser.rs

//! Recipe file parsing

use crate::error::{Error, Result};
use crate::recipe::format::RecipeFile;
use crate::recipe::model::{PatchOrigin, Recipe};
use std::path::Path;

/// Parse and validate a recipe from a TOML string
///
/// Local patch files are resolved against `base_dir`.
pub fn parse_recipe(content: &str, base_dir: &Path) -> Result<Recipe> {
    parse_labelled(content, "<inline>", base_dir)
}

/// Parse and validate a recipe file
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read recipe file {}: {}", path.display(), e))
    })?;

    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let base_dir = path.parent().unwrap_or(Path::new("."));

    parse_labelled(&content, &label, base_dir)
}

fn parse_labelled(content: &str, label: &str, base_dir: &Path) -> Result<Recipe> {
    let file: RecipeFile = toml::from_str(content)
        .map_err(|e| Error::validation(label, format!("invalid TOML: {}", e.message())))?;
    Recipe::from_file(file, base_dir)
}

/// Check a valid recipe for things that are allowed but probably wrong
///
/// Returns human-readable warnings; an empty list means nothing to report.
pub fn lint_recipe(recipe: &Recipe, file_stem: Option<&str>) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(stem) = file_stem
        && stem != recipe.name()
    {
        warnings.push(format!(
            "Recipe '{}' is stored in {}.toml; lookups by name will not find it",
            recipe.name(),
            stem
        ));
    }

    if recipe.description().is_none() {
        warnings.push("Missing description".to_string());
    }
    if recipe.license().is_none() {
        warnings.push("Missing license".to_string());
    }
    if recipe.source().is_none() && !recipe.steps().is_empty() {
        warnings.push("Install steps run without a source archive".to_string());
    }
    if recipe.source().is_some() && recipe.steps().is_empty() {
        warnings.push("Source is fetched but there are no install steps".to_string());
    }

    if let Some(source) = recipe.source() {
        for url in source.urls() {
            if url.starts_with("http://") {
                warnings.push(format!("Source {} is fetched over plain HTTP", url));
            }
        }
    }

    for patch in recipe.patches() {
        if let PatchOrigin::File(path) = patch.origin()
            && !path.is_file()
        {
            warnings.push(format!(
                "Patch file {} does not exist",
                path.display()
            ));
        }
    }

    for (key, value) in recipe.variables() {
        let used = recipe
            .steps()
            .iter()
            .flat_map(|s| s.args().iter().map(String::as_str).chain([s.program()]))
            .chain(recipe.env().values().map(String::as_str))
            .any(|arg| arg.contains(&format!("${}", key)) || arg.contains(&format!("${{{}}}", key)));
        if !used {
            warnings.push(format!("Variable {} = '{}' is never used", key, value));
        }
    }

    warnings
}
