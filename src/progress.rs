// src/progress.rs

//! Shared progress tracking trait and implementations
//!
//! A build reports progress per recipe. The `ProgressTracker` trait is what
//! one recipe's progress looks like to the outside; `ProgressObserver` turns
//! the kitchen's state transitions into tracker updates, creating one
//! tracker per recipe the first time it is seen.
//!
//! Implementations in this crate:
//! - `LogProgress`: Logs progress to tracing
//! - `SilentProgress`: No-op for scripted/quiet modes
//!
//! The binary adds an indicatif spinner tracker for interactive terminals.

use crate::recipe::kitchen::{BuildObserver, BuildState};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Number of forward transitions from `Pending` to `Done`
pub const BUILD_STAGES: u64 = 6;

/// Core trait for progress tracking
///
/// Implementations should be thread-safe (Send + Sync) since recipes
/// report from the build pool's worker threads.
pub trait ProgressTracker: Send + Sync {
    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Set progress to a specific position
    fn set_position(&self, position: u64);

    /// Get current position
    fn position(&self) -> u64;

    /// Finish progress successfully with a message
    fn finish_with_message(&self, message: &str);

    /// Finish progress with an error/abandonment message
    fn finish_with_error(&self, message: &str);

    /// Check if progress is finished
    fn is_finished(&self) -> bool;
}

/// Silent progress tracker (no-op)
#[derive(Debug, Default)]
pub struct SilentProgress {
    position: AtomicU64,
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn finish_with_error(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Logging progress tracker
///
/// Logs every update to tracing at info level. Used when stderr is not a
/// terminal, so build progress still shows up in captured logs.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    position: AtomicU64,
    finished: AtomicBool,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, message: &str) {
        self.finished.store(true, Ordering::Relaxed);
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        self.finished.store(true, Ordering::Relaxed);
        warn!("{}: ERROR - {}", self.name, message);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Events emitted by callback progress tracker
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Message(String),
    Position(u64),
    Finished(String),
    Error(String),
}

/// Callback-based progress tracker, used to capture updates in tests
#[cfg(test)]
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    position: AtomicU64,
    finished: AtomicBool,
}

#[cfg(test)]
impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            position: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn set_message(&self, message: &str) {
        (self.callback)(ProgressEvent::Message(message.to_string()));
    }

    fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Position(position));
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, message: &str) {
        self.finished.store(true, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Finished(message.to_string()));
    }

    fn finish_with_error(&self, message: &str) {
        self.finished.store(true, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Error(message.to_string()));
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

type TrackerFactory = Box<dyn Fn(&str) -> Box<dyn ProgressTracker> + Send + Sync>;

/// Feeds build state transitions into one tracker per recipe
pub struct ProgressObserver {
    factory: TrackerFactory,
    trackers: Mutex<BTreeMap<String, Box<dyn ProgressTracker>>>,
}

impl ProgressObserver {
    /// Create trackers with `factory`, called with the recipe name
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Box<dyn ProgressTracker> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            trackers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Progress as tracing log lines
    pub fn logging() -> Self {
        Self::new(|recipe| Box::new(LogProgress::new(recipe)))
    }

    pub fn silent() -> Self {
        Self::new(|_| Box::new(SilentProgress::new()))
    }

    /// Recipes that have reported at least once
    pub fn recipes(&self) -> Vec<String> {
        self.trackers
            .lock()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn with_tracker(&self, recipe: &str, update: impl FnOnce(&dyn ProgressTracker)) {
        let Ok(mut trackers) = self.trackers.lock() else {
            return;
        };
        let tracker = trackers
            .entry(recipe.to_string())
            .or_insert_with(|| (self.factory)(recipe));
        update(tracker.as_ref());
    }
}

/// Position of a state along the happy path
pub fn stage_position(state: BuildState) -> u64 {
    match state {
        BuildState::Pending => 0,
        BuildState::Fetched => 1,
        BuildState::Patched => 2,
        BuildState::Configuring => 3,
        BuildState::Building => 4,
        BuildState::Installing => 5,
        BuildState::Done => BUILD_STAGES,
        BuildState::Failed => 0,
    }
}

impl BuildObserver for ProgressObserver {
    fn on_transition(&self, recipe: &str, from: BuildState, to: BuildState) {
        self.with_tracker(recipe, |tracker| match to {
            BuildState::Done => {
                tracker.set_position(BUILD_STAGES);
                tracker.finish_with_message("done");
            }
            BuildState::Failed => tracker.finish_with_error(&format!("failed while {}", from)),
            other => {
                tracker.set_position(stage_position(other));
                tracker.set_message(&other.to_string());
            }
        });
    }

    fn on_note(&self, recipe: &str, note: &str) {
        self.with_tracker(recipe, |tracker| tracker.set_message(note));
    }
}
