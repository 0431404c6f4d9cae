// src/recipe/cookbook.rs

//! A collection of recipes loaded together
//!
//! The cookbook owns every recipe in a recipe directory and performs the
//! checks that need more than one recipe: duplicate names and dependencies
//! on recipes that do not exist.

use crate::error::{Error, Result};
use crate::host::HostOs;
use crate::recipe::graph::RecipeGraph;
use crate::recipe::model::Recipe;
use crate::recipe::parser::parse_recipe_file;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Cookbook {
    recipes: BTreeMap<String, Recipe>,
    os: HostOs,
}

impl Cookbook {
    /// Load every `*.toml` file in `dir`
    pub fn load_dir(dir: &Path, os: HostOs) -> Result<Self> {
        let paths = recipe_files(dir)?;
        debug!("Loading {} recipe(s) from {}", paths.len(), dir.display());

        let recipes = paths
            .iter()
            .map(|path| parse_recipe_file(path))
            .collect::<Result<Vec<_>>>()?;

        Self::from_recipes(recipes, os)
    }

    /// Build a cookbook from already parsed recipes
    ///
    /// Only dependencies that apply on `os` must name a known recipe.
    pub fn from_recipes(recipes: Vec<Recipe>, os: HostOs) -> Result<Self> {
        let mut map = BTreeMap::new();

        for recipe in recipes {
            let name = recipe.name().to_string();
            if map.insert(name.clone(), recipe).is_some() {
                return Err(Error::validation(&name, "defined more than once"));
            }
        }

        for recipe in map.values() {
            for dep in recipe.dependency_names(os) {
                if !map.contains_key(dep) {
                    return Err(Error::validation(
                        recipe.name(),
                        format!("depends on unknown recipe '{}'", dep),
                    ));
                }
            }
        }

        Ok(Self { recipes: map, os })
    }

    pub fn os(&self) -> HostOs {
        self.os
    }

    pub fn get(&self, name: &str) -> Result<&Recipe> {
        self.recipes
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("recipe '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    pub fn recipes(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.values()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Dependency graph of every recipe, with edges active on this host
    pub fn graph(&self) -> RecipeGraph {
        let mut graph = RecipeGraph::new();
        for recipe in self.recipes.values() {
            graph.add_from_recipe(recipe, self.os);
        }
        graph
    }

    /// Build order for the given targets
    pub fn resolve<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<String>> {
        for target in targets {
            self.get(target.as_ref())?;
        }
        self.graph().resolve(targets)
    }
}

/// Recipe files in a directory, sorted by path
pub fn recipe_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::IoError(format!("Failed to read recipe directory {}: {}", dir.display(), e))
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
