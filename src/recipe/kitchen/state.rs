// src/recipe/kitchen/state.rs

//! Per-recipe build state machine
//!
//! ```text
//! Pending -> Fetched -> Patched -> Configuring -> Building -> Installing -> Done
//!    \          \          \            \             \            \
//!     +----------+----------+------------+-------------+------------+--> Failed
//! ```
//!
//! Every forward move goes to the single next state. `Failed` is reachable
//! from any state that is not terminal. Nothing is ever re-entered.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use strum_macros::Display;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Pending,
    Fetched,
    Patched,
    Configuring,
    Building,
    Installing,
    Done,
    Failed,
}

impl BuildState {
    /// The only state a successful step may move to
    pub fn next(self) -> Option<BuildState> {
        match self {
            Self::Pending => Some(Self::Fetched),
            Self::Fetched => Some(Self::Patched),
            Self::Patched => Some(Self::Configuring),
            Self::Configuring => Some(Self::Building),
            Self::Building => Some(Self::Installing),
            Self::Installing => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, to: BuildState) -> bool {
        match to {
            Self::Failed => !self.is_terminal(),
            _ => self.next() == Some(to),
        }
    }
}

/// Receives every state change of every recipe
pub trait BuildObserver: Send + Sync {
    fn on_transition(&self, recipe: &str, from: BuildState, to: BuildState);

    /// A recipe finished a stage with a short note (fetched bytes, files installed)
    fn on_note(&self, _recipe: &str, _note: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BuildObserver for NoopObserver {
    fn on_transition(&self, _recipe: &str, _from: BuildState, _to: BuildState) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: BuildState,
    pub to: BuildState,
    pub at: DateTime<Utc>,
}

/// Tracks one recipe through the state machine
pub struct BuildTracker {
    recipe: String,
    state: BuildState,
    history: Vec<Transition>,
    observer: Arc<dyn BuildObserver>,
}

impl BuildTracker {
    pub fn new(recipe: impl Into<String>, observer: Arc<dyn BuildObserver>) -> Self {
        Self {
            recipe: recipe.into(),
            state: BuildState::Pending,
            history: Vec::new(),
            observer,
        }
    }

    pub fn recipe(&self) -> &str {
        &self.recipe
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Transition> {
        self.history
    }

    /// Move to `to`, which must be the next state
    pub fn advance(&mut self, to: BuildState) -> Result<()> {
        if to == BuildState::Failed || !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                recipe: self.recipe.clone(),
                from: self.state,
                to,
            });
        }
        self.record(to);
        Ok(())
    }

    /// Move to `Failed` and wrap `error` with the recipe and the state it failed in
    pub fn fail(&mut self, error: Error) -> Error {
        let phase = self.state;
        if phase.can_transition_to(BuildState::Failed) {
            self.record(BuildState::Failed);
        }

        match error {
            already @ Error::Recipe { .. } => already,
            source => Error::Recipe {
                recipe: self.recipe.clone(),
                phase,
                source: Box::new(source),
            },
        }
    }

    pub fn note(&self, note: &str) {
        self.observer.on_note(&self.recipe, note);
    }

    fn record(&mut self, to: BuildState) {
        let from = self.state;
        debug!("{}: {} -> {}", self.recipe, from, to);
        self.history.push(Transition {
            from,
            to,
            at: Utc::now(),
        });
        self.state = to;
        self.observer.on_transition(&self.recipe, from, to);
    }
}
