//! Last-activity tracking shared between the dispatcher and the
//! idleness supervisor.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonically nondecreasing timestamp of the last qualifying request.
///
/// Starts at construction time, so a freshly started proxy gets a full
/// idle period before the first deactivation.
pub struct ActivityTracker {
    last: Mutex<Instant>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record activity now. Last writer wins; the value never moves back.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut last = self.last.lock().expect("activity lock");
        if now > *last {
            *last = now;
        }
    }

    /// Time since the last qualifying request.
    pub fn elapsed(&self) -> Duration {
        self.last.lock().expect("activity lock").elapsed()
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
