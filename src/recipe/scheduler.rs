// src/recipe/scheduler.rs

//! Build orchestration across a dependency closure
//!
//! Recipes are grouped into levels by dependency depth. Each level is cooked
//! on a rayon pool of `jobs` threads, and a level only starts once every
//! recipe in the previous one has finished, so a recipe never starts before
//! its dependencies are `Done`.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::recipe::cookbook::Cookbook;
use crate::recipe::kitchen::{BuildTracker, CookResult, Kitchen};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// What happens to the rest of the build when a recipe fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Start nothing new after the first failure
    #[default]
    FailFast,
    /// Keep building recipes that do not depend on the failure
    KeepGoing,
}

/// Final outcome of one recipe in a build
#[derive(Debug)]
pub enum RecipeOutcome {
    Built(CookResult),
    Failed(Error),
    /// Never started because the build was halted or cancelled
    NotStarted,
}

impl RecipeOutcome {
    pub fn is_built(&self) -> bool {
        matches!(self, RecipeOutcome::Built(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            RecipeOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of every recipe in the build order
#[derive(Debug)]
pub struct BuildReport {
    pub order: Vec<String>,
    pub outcomes: BTreeMap<String, RecipeOutcome>,
}

impl BuildReport {
    pub fn outcome(&self, name: &str) -> Option<&RecipeOutcome> {
        self.outcomes.get(name)
    }

    /// Successful builds, in build order
    pub fn built(&self) -> Vec<&CookResult> {
        self.in_order()
            .filter_map(|(_, outcome)| match outcome {
                RecipeOutcome::Built(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    /// Failed recipes, in build order
    pub fn failures(&self) -> Vec<(&str, &Error)> {
        self.in_order()
            .filter_map(|(name, outcome)| outcome.error().map(|e| (name, e)))
            .collect()
    }

    pub fn not_started(&self) -> Vec<&str> {
        self.in_order()
            .filter(|(_, outcome)| matches!(outcome, RecipeOutcome::NotStarted))
            .map(|(name, _)| name)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(RecipeOutcome::is_built)
    }

    /// The failure that caused the build to stop
    ///
    /// Skipped dependents are only reported when nothing else failed.
    pub fn first_error(&self) -> Option<&Error> {
        let failures = self.failures();
        failures
            .iter()
            .find(|(_, e)| !matches!(e.root(), Error::DependencyFailed(_)))
            .or_else(|| failures.first())
            .map(|(_, e)| *e)
    }

    /// Process exit code for the whole build
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else if let Some(error) = self.first_error() {
            error.exit_code()
        } else {
            // only unstarted recipes: the build was cancelled
            130
        }
    }

    /// Take ownership of the error [`first_error`](Self::first_error) would return
    ///
    /// A failed build without any failed recipe was cancelled before
    /// anything started.
    pub fn into_error(mut self) -> Option<Error> {
        if self.is_success() {
            return None;
        }

        let name = self
            .first_error()
            .and_then(|wanted| {
                self.outcomes
                    .iter()
                    .find(|(_, o)| o.error().is_some_and(|e| std::ptr::eq(e, wanted)))
                    .map(|(name, _)| name.clone())
            });

        match name.and_then(|n| self.outcomes.remove(&n)) {
            Some(RecipeOutcome::Failed(e)) => Some(e),
            _ => Some(Error::Cancelled("build".to_string())),
        }
    }

    fn in_order(&self) -> impl Iterator<Item = (&str, &RecipeOutcome)> {
        self.order
            .iter()
            .filter_map(|name| self.outcomes.get(name).map(|o| (name.as_str(), o)))
    }
}

/// Builds a dependency closure with a [`Kitchen`]
pub struct Scheduler<'a> {
    kitchen: &'a Kitchen,
    policy: FailurePolicy,
}

impl<'a> Scheduler<'a> {
    pub fn new(kitchen: &'a Kitchen, policy: FailurePolicy) -> Self {
        Self { kitchen, policy }
    }

    /// Build `targets` and everything they depend on
    ///
    /// Resolution and validation errors are returned before anything is
    /// fetched. Build failures are reported per recipe in the report.
    pub fn run<S: AsRef<str>>(
        &self,
        cookbook: &Cookbook,
        targets: &[S],
        cancel: &CancelToken,
    ) -> Result<BuildReport> {
        let graph = cookbook.graph();
        let order = graph.resolve(targets)?;
        for name in &order {
            self.kitchen.preflight(cookbook.get(name)?)?;
        }

        let levels = graph.levels(&order);
        let jobs = self.kitchen.config().jobs.max(1) as usize;
        info!(
            "Building {} recipe(s) in {} level(s) with {} job(s)",
            order.len(),
            levels.len(),
            jobs
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("sous-build-{}", i))
            .build()
            .map_err(|e| Error::IoError(format!("Failed to start build pool: {}", e)))?;

        let halted = AtomicBool::new(false);
        let mut outcomes: BTreeMap<String, RecipeOutcome> = BTreeMap::new();

        for level in levels {
            let finished = &outcomes;
            let results: Vec<(String, RecipeOutcome)> = pool.install(|| {
                level
                    .par_iter()
                    .map(|name| {
                        let outcome = self.build_one(cookbook, name, finished, &halted, cancel);
                        (name.clone(), outcome)
                    })
                    .collect()
            });
            outcomes.extend(results);
        }

        Ok(BuildReport { order, outcomes })
    }

    fn build_one(
        &self,
        cookbook: &Cookbook,
        name: &str,
        finished: &BTreeMap<String, RecipeOutcome>,
        halted: &AtomicBool,
        cancel: &CancelToken,
    ) -> RecipeOutcome {
        if halted.load(Ordering::SeqCst) || cancel.is_cancelled() {
            return RecipeOutcome::NotStarted;
        }

        let recipe = match cookbook.get(name) {
            Ok(recipe) => recipe,
            Err(e) => return RecipeOutcome::Failed(e),
        };

        let broken_dependency = recipe
            .dependency_names(cookbook.os())
            .into_iter()
            .find(|dep| !finished.get(*dep).is_some_and(RecipeOutcome::is_built));
        if let Some(dep) = broken_dependency {
            warn!("Skipping {}: dependency {} was not built", name, dep);
            let mut tracker = BuildTracker::new(name, self.kitchen.observer());
            return RecipeOutcome::Failed(tracker.fail(Error::DependencyFailed(dep.to_string())));
        }

        match self.kitchen.cook(recipe, cancel) {
            Ok(result) => RecipeOutcome::Built(result),
            Err(e) => {
                if self.policy == FailurePolicy::FailFast {
                    halted.store(true, Ordering::SeqCst);
                }
                RecipeOutcome::Failed(e)
            }
        }
    }
}
