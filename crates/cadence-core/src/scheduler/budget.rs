use std::time::Duration;

use tokio::time::Instant;

/// Fixed-window call budget mirroring one upstream quota.
///
/// `remaining` starts at `quota` and is reset to `quota` whenever the current
/// window ends; the reset instant advances by whole windows so a budget that
/// sat idle for several windows stays aligned with upstream.
///
/// Always accessed under its rotation's lock.
#[derive(Debug, Clone)]
pub struct RateBudget {
    window: Duration,
    quota: u32,
    remaining: u32,
    window_reset_at: Instant,
}

impl RateBudget {
    /// Create a budget starting at full quota. `quota` is clamped to at least
    /// 1 and `window` to at least one millisecond.
    pub fn new(window: Duration, quota: u32) -> Self {
        Self::starting_at(window, quota, Instant::now())
    }

    /// Create a budget whose first window starts at `now`.
    pub fn starting_at(window: Duration, quota: u32, now: Instant) -> Self {
        let window = window.max(Duration::from_millis(1));
        let quota = quota.max(1);
        Self {
            window,
            quota,
            remaining: quota,
            window_reset_at: now + window,
        }
    }

    /// Reset `remaining` if the current window has ended.
    pub fn refresh(&mut self, now: Instant) {
        if now < self.window_reset_at {
            return;
        }
        let overdue = now.duration_since(self.window_reset_at).as_nanos();
        let windows = overdue / self.window.as_nanos() + 1;
        let advance = u64::try_from(windows * self.window.as_nanos()).unwrap_or(u64::MAX);
        self.window_reset_at += Duration::from_nanos(advance);
        self.remaining = self.quota;
    }

    /// Take one call slot. Returns false without modification when the
    /// window's quota is spent.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// Align with counters reported by upstream. Missing values leave the
    /// corresponding local state untouched.
    pub fn resync(&mut self, remaining: Option<u32>, reset_in: Option<Duration>, now: Instant) {
        if let Some(remaining) = remaining {
            self.remaining = remaining.min(self.quota);
        }
        if let Some(reset_in) = reset_in {
            self.window_reset_at = now + reset_in;
        }
    }

    /// Spacing between dispatches that spends exactly one quota per window.
    pub fn slot_interval(&self) -> Duration {
        self.window / self.quota
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn quota(&self) -> u32 {
        self.quota
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_reset_at(&self) -> Instant {
        self.window_reset_at
    }
}
