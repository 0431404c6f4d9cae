// src/commands/progress.rs
//! Terminal progress for builds
//!
//! Interactive terminals get one indicatif spinner per recipe, stacked in a
//! `MultiProgress`. Anything else gets the log-based tracker.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use sous::progress::{ProgressObserver, ProgressTracker, BUILD_STAGES};
use sous::recipe::kitchen::BuildObserver;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

/// One recipe's spinner
pub struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    pub fn new(multi: &MultiProgress, recipe: &str) -> Self {
        let bar = ProgressBar::new(BUILD_STAGES);
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} [{pos}/{len}] {prefix:.bold} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(recipe.to_string());
        let bar = multi.add(bar);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressTracker for SpinnerProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn set_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(format!("[OK] {}", message));
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(format!("[FAILED] {}", message));
    }

    fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

/// Pick a progress display for a build
///
/// `quiet` is used for machine-readable output, where only logs may go to
/// stderr.
pub fn build_observer(quiet: bool) -> Arc<dyn BuildObserver> {
    if quiet {
        Arc::new(ProgressObserver::silent())
    } else if std::io::stderr().is_terminal() {
        let multi = MultiProgress::new();
        Arc::new(ProgressObserver::new(move |recipe| {
            Box::new(SpinnerProgress::new(&multi, recipe))
        }))
    } else {
        Arc::new(ProgressObserver::logging())
    }
}
