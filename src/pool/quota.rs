//! Sliding-window quota tracking for a single credential.
//!
//! Each credential carries one trailing-60-second window of call timestamps.
//! The pool consults the window before every acquisition, so the trailing
//! count can never exceed the per-minute ceiling.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// A sliding-window counter over call timestamps.
///
/// Methods take `now` explicitly so tests can drive the clock.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window_secs: u64,
    max_count: u64,
    events: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    pub fn new(window_secs: u64, max_count: u64) -> Self {
        Self {
            window_secs,
            max_count,
            events: VecDeque::new(),
        }
    }

    /// Window with the standard 60-second span.
    pub fn per_minute(max_count: u64) -> Self {
        Self::new(60, max_count)
    }

    /// Discard events older than the window boundary.
    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(self.window_secs as i64);
        while self.events.front().is_some_and(|t| *t <= cutoff) {
            self.events.pop_front();
        }
    }

    /// Record a call at `at`.
    pub fn record_event(&mut self, at: DateTime<Utc>) {
        self.evict(at);
        self.events.push_back(at);
    }

    /// Count calls within the current window.
    pub fn count_in_window(&mut self, now: DateTime<Utc>) -> u64 {
        self.evict(now);
        self.events.len() as u64
    }

    /// `true` once the window has reached its ceiling.
    pub fn is_limited(&mut self, now: DateTime<Utc>) -> bool {
        self.count_in_window(now) >= self.max_count
    }

    /// Configured ceiling for this window.
    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Time until the oldest call expires and a slot frees up.
    ///
    /// `None` while the window still has capacity.
    pub fn time_until_slot(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_limited(now) {
            return None;
        }
        self.events.front().map(|oldest| {
            let expiry = *oldest + Duration::seconds(self.window_secs as i64);
            expiry - now
        })
    }
}
