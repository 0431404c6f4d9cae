// src/error.rs

//! Error types for the build engine
//!
//! Every failure that can stop a recipe build has its own variant so the CLI
//! can map it to a distinct exit code. Failures raised while a recipe is being
//! cooked are wrapped in [`Error::Recipe`], which carries the recipe name and
//! the build state it was in.

use crate::recipe::BuildState;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed recipe, caught before any I/O
    #[error("Invalid recipe '{recipe}': {message}")]
    Validation { recipe: String, message: String },

    /// Unsatisfiable dependency graph
    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// Downloaded content does not match the declared checksum
    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    /// A patch or source transform does not apply cleanly
    #[error("Patch '{patch}' does not apply to {file}: {hunk}")]
    Patch {
        patch: String,
        file: String,
        hunk: String,
    },

    /// An install step exited unsuccessfully
    #[error("`{command}` {}", describe_exit(.exit_code))]
    Build {
        command: String,
        exit_code: Option<i32>,
        output: Vec<String>,
    },

    /// The build was interrupted by the cancellation token
    #[error("Cancelled during {0}")]
    Cancelled(String),

    /// A dependency of this recipe failed, so it was never started
    #[error("Skipped: dependency '{0}' failed")]
    DependencyFailed(String),

    /// Illegal build state transition (internal invariant)
    #[error("Invalid state transition for {recipe}: {from} -> {to}")]
    InvalidTransition {
        recipe: String,
        from: BuildState,
        to: BuildState,
    },

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A failure while cooking a specific recipe
    #[error("{recipe} failed (state: {phase}): {source}")]
    Recipe {
        recipe: String,
        phase: BuildState,
        #[source]
        source: Box<Error>,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {}", code),
        None => "was terminated by a signal or timed out".to_string(),
    }
}

impl Error {
    /// Shorthand for a validation error
    pub fn validation(recipe: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            recipe: recipe.into(),
            message: message.into(),
        }
    }

    /// Strip any recipe context and return the originating error
    pub fn root(&self) -> &Error {
        match self {
            Error::Recipe { source, .. } => source.root(),
            other => other,
        }
    }

    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Error::Validation { .. } => 2,
            Error::Cycle { .. } => 3,
            Error::Integrity { .. } => 4,
            Error::Patch { .. } => 5,
            Error::Build { .. } => 6,
            Error::Cancelled(_) => 130,
            _ => 1,
        }
    }

    /// Whether a fetch that failed with this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Error::DownloadError(_))
    }

    /// Whether this error came from the cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled(_))
    }
}
