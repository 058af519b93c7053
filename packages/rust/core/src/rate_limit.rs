//! Per-source sliding-window admission control.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Length of the admission window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Admits at most `limit` calls per source key within any [`WINDOW`].
///
/// Denial is a normal outcome: callers skip the source for this cycle.
#[derive(Debug)]
pub struct RateLimiter {
    limit: AtomicU32,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit_per_window: u32) -> Self {
        Self {
            limit: AtomicU32::new(limit_per_window),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Takes effect on the next admission check; recorded calls are kept.
    pub fn set_limit(&self, limit_per_window: u32) {
        self.limit.store(limit_per_window, Ordering::Relaxed);
    }

    pub fn allow(&self, source_key: &str) -> bool {
        self.allow_at(source_key, Instant::now())
    }

    /// Admission check against an explicit clock reading.
    pub fn allow_at(&self, source_key: &str, now: Instant) -> bool {
        let limit = self.limit() as usize;
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let window = windows.entry(source_key.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < limit {
            window.push_back(now);
            true
        } else {
            false
        }
    }
}
