// src/cancel.rs

//! Cooperative cancellation for fetches and build steps

use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared cancellation flag
///
/// Clones observe the same flag. Raising it makes in-flight downloads stop
/// at the next chunk and in-flight build steps get killed at the next poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if the token has been raised
    pub fn check(&self, during: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(during.to_string()))
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if cancelled
    pub fn sleep(&self, duration: Duration, during: &str) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check(during)?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }
}
