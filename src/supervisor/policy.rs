//! Restart pacing

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Limits how often the capture process is restarted.
///
/// The first restart in a window is immediate; each further one waits
/// twice as long as the previous, up to `max_delay`. Once `max_restarts`
/// happened within `window`, the next waits until the oldest leaves it.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    max_restarts: u32,
    window: Duration,
    initial_delay: Duration,
    max_delay: Duration,
    history: VecDeque<Instant>,
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, window: Duration, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_restarts: max_restarts.max(1),
            window,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            history: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.history.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Restarts still counted against the window at `now`
    pub fn restarts_in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.history.len()
    }

    /// Whether the restart cap is currently exhausted
    pub fn capped(&mut self, now: Instant) -> bool {
        self.restarts_in_window(now) >= self.max_restarts as usize
    }

    /// Wait before the next restart may happen
    pub fn delay(&mut self, now: Instant) -> Duration {
        let recent = self.restarts_in_window(now);
        if recent >= self.max_restarts as usize {
            return self
                .history
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default();
        }
        if recent == 0 {
            return Duration::ZERO;
        }
        let exp = (recent - 1).min(16) as u32;
        self.initial_delay
            .saturating_mul(1 << exp)
            .min(self.max_delay)
    }

    /// Count a restart performed at `at`
    pub fn record(&mut self, at: Instant) {
        self.history.push_back(at);
    }
}
