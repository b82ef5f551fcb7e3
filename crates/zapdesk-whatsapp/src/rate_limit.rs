//! Fixed-window request counter, keyed per account.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub(crate) struct RateLimiter {
    max: u32,
    window: Duration,
    windows: HashMap<Uuid, (Instant, u32)>,
}

impl RateLimiter {
    pub(crate) fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            windows: HashMap::new(),
        }
    }

    /// Count one request; false once `max` is exceeded inside the window.
    pub(crate) fn check(&mut self, key: Uuid, now: Instant) -> bool {
        let entry = self.windows.entry(key).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        if entry.1 >= self.max {
            return false;
        }
        entry.1 += 1;
        true
    }

    pub(crate) fn forget(&mut self, key: Uuid) {
        self.windows.remove(&key);
    }
}
