// src/recipe/graph.rs

//! Recipe dependency graph for build ordering
//!
//! Nodes are recipe names; an edge `a -> b` means `a` needs `b` built first,
//! whatever the dependency phase. Ordering uses a depth-first topological
//! sort with three marks (unvisited, in progress, done). Reaching a node that
//! is still in progress means the current path has looped back on itself,
//! and that path is reported as the cycle.
//!
//! All maps are ordered, and both targets and dependencies are visited in
//! name order, so the same input always yields the same build order.
//!
//! ```ignore
//! use sous::recipe::RecipeGraph;
//!
//! let mut graph = RecipeGraph::new();
//! graph.add_recipe("qemu", &["glib", "meson"]);
//! graph.add_recipe("glib", &["meson"]);
//! graph.add_recipe("meson", &[]);
//!
//! let order = graph.resolve(&["qemu"]).unwrap();
//! // order: ["meson", "glib", "qemu"]
//! ```

use crate::error::{Error, Result};
use crate::host::HostOs;
use crate::recipe::model::Recipe;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// A directed graph of recipe dependencies
#[derive(Debug, Default, Clone)]
pub struct RecipeGraph {
    /// Recipe name -> recipes it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
    /// Recipe name -> recipes that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl RecipeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipe with its dependencies
    ///
    /// Dependencies become nodes too. Adding a recipe twice merges the edges.
    pub fn add_recipe(&mut self, name: &str, dependencies: &[&str]) {
        self.edges.entry(name.to_string()).or_default();
        self.reverse_edges.entry(name.to_string()).or_default();

        for dep in dependencies {
            self.edges.entry(dep.to_string()).or_default();
            self.edges
                .entry(name.to_string())
                .or_default()
                .insert(dep.to_string());
            self.reverse_edges
                .entry(dep.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }

    /// Add a recipe's dependency edges that apply on `os`
    pub fn add_from_recipe(&mut self, recipe: &Recipe, os: HostOs) {
        self.add_recipe(recipe.name(), &recipe.dependency_names(os));
    }

    pub fn recipe_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Direct dependencies of a recipe
    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(name)
    }

    /// Recipes that directly depend on this recipe
    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.reverse_edges.get(name)
    }

    /// Everything that must be built before `name`, excluding `name` itself
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        Self::reach(&self.edges, name)
    }

    /// Everything that needs `name`, directly or indirectly
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        Self::reach(&self.reverse_edges, name)
    }

    fn reach(edges: &BTreeMap<String, BTreeSet<String>>, start: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start.to_string()];

        while let Some(node) = stack.pop() {
            if let Some(next) = edges.get(&node) {
                for n in next {
                    if seen.insert(n.clone()) {
                        stack.push(n.clone());
                    }
                }
            }
        }

        seen.remove(start);
        seen
    }

    /// Build order for `targets` and everything they depend on
    ///
    /// Every dependency precedes its dependents. Recipes outside the
    /// targets' closure are left out.
    pub fn resolve<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<String>> {
        let mut roots: Vec<&str> = targets.iter().map(AsRef::as_ref).collect();
        roots.sort_unstable();
        roots.dedup();

        for root in &roots {
            if !self.contains(root) {
                return Err(Error::NotFound(format!("recipe '{}'", root)));
            }
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let mut path: Vec<&str> = Vec::new();
        let mut order = Vec::with_capacity(self.edges.len());

        for root in roots {
            self.visit(root, &mut marks, &mut path, &mut order)?;
        }

        Ok(order)
    }

    /// Build order for every recipe in the graph
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let all: Vec<&str> = self.edges.keys().map(String::as_str).collect();
        self.resolve(&all)
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(node.to_string());
                return Err(Error::Cycle { cycle });
            }
            None => {}
        }

        marks.insert(node, Mark::InProgress);
        path.push(node);

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                self.visit(dep, marks, path, order)?;
            }
        }

        path.pop();
        marks.insert(node, Mark::Done);
        order.push(node.to_string());
        Ok(())
    }

    /// Group an order into levels that can be built concurrently
    ///
    /// A recipe's level is one more than the deepest of its dependencies in
    /// `order`; recipes with no dependencies in `order` are level 0. Names
    /// inside each level keep their relative order.
    pub fn levels(&self, order: &[String]) -> Vec<Vec<String>> {
        let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for name in order {
            let level = self
                .edges
                .get(name)
                .into_iter()
                .flatten()
                .filter_map(|dep| depth.get(dep.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);

            depth.insert(name.as_str(), level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(name.clone());
        }

        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_simple_chain() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("c", &["b"]);
        graph.add_recipe("b", &["a"]);
        graph.add_recipe("a", &[]);

        assert_eq!(graph.topological_sort().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("app", &["left", "right"]);
        graph.add_recipe("left", &["base"]);
        graph.add_recipe("right", &["base"]);

        let order = graph.resolve(&["app"]).unwrap();
        assert_eq!(order, vec!["base", "left", "right", "app"]);
    }

    #[test]
    fn test_tie_break_is_by_name() {
        let mut first = RecipeGraph::new();
        first.add_recipe("zeta", &[]);
        first.add_recipe("alpha", &[]);
        first.add_recipe("mid", &[]);

        let mut second = RecipeGraph::new();
        second.add_recipe("mid", &[]);
        second.add_recipe("alpha", &[]);
        second.add_recipe("zeta", &[]);

        let expected = vec!["alpha", "mid", "zeta"];
        assert_eq!(first.topological_sort().unwrap(), expected);
        assert_eq!(second.topological_sort().unwrap(), expected);
        assert_eq!(first.resolve(&["zeta", "alpha"]).unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_resolve_only_includes_closure() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("qemu", &["glib", "meson"]);
        graph.add_recipe("glib", &["meson"]);
        graph.add_recipe("unrelated", &["meson"]);

        let order = graph.resolve(&["qemu"]).unwrap();
        assert_eq!(order, vec!["meson", "glib", "qemu"]);
        assert!(position(&order, "meson") < position(&order, "glib"));
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("a", &["b"]);
        graph.add_recipe("b", &["c"]);
        graph.add_recipe("c", &["a"]);
        graph.add_recipe("d", &["a"]);

        match graph.resolve(&["d"]) {
            Err(Error::Cycle { cycle }) => assert_eq!(cycle, vec!["a", "b", "c", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_outside_targets_is_ignored() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("x", &["y"]);
        graph.add_recipe("y", &["x"]);
        graph.add_recipe("ok", &[]);

        assert_eq!(graph.resolve(&["ok"]).unwrap(), vec!["ok"]);
        assert!(graph.topological_sort().is_err());
    }

    #[test]
    fn test_unknown_target() {
        let graph = RecipeGraph::new();
        assert!(matches!(graph.resolve(&["nope"]), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_transitive_queries() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("app", &["lib"]);
        graph.add_recipe("lib", &["base"]);
        graph.add_recipe("tool", &["base"]);

        let deps: Vec<_> = graph.transitive_dependencies("app").into_iter().collect();
        assert_eq!(deps, vec!["base", "lib"]);

        let dependents: Vec<_> = graph.transitive_dependents("base").into_iter().collect();
        assert_eq!(dependents, vec!["app", "lib", "tool"]);

        assert_eq!(graph.dependents("lib").unwrap().len(), 1);
    }

    #[test]
    fn test_levels() {
        let mut graph = RecipeGraph::new();
        graph.add_recipe("app", &["lib", "tool"]);
        graph.add_recipe("lib", &["base"]);
        graph.add_recipe("tool", &[]);
        graph.add_recipe("base", &[]);

        let order = graph.resolve(&["app"]).unwrap();
        let levels = graph.levels(&order);
        assert_eq!(levels, vec![vec!["base", "tool"], vec!["lib"], vec!["app"]]);
    }
}
