use std::time::Duration;

use crate::model::ActivityType;
use crate::scheduler::budget::RateBudget;

/// Estimates how long a queued user waits for their next dispatch.
///
/// The dispatch loop serves one rotation slot every `window / quota`, so
/// position `p` (0-indexed) is reached after `p` slots. This ignores entries
/// that are backing off; the estimate is an upper bound in the common case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeEstimator {
    slot_interval: Duration,
}

impl WaitTimeEstimator {
    pub fn new(window: Duration, quota: u32) -> Self {
        Self {
            slot_interval: window / quota.max(1),
        }
    }

    pub fn for_budget(budget: &RateBudget) -> Self {
        Self {
            slot_interval: budget.slot_interval(),
        }
    }

    pub fn slot_interval(&self) -> Duration {
        self.slot_interval
    }

    /// Wait for the entry at `position` in rotation order.
    pub fn wait_for_position(&self, position: usize) -> Duration {
        let slots = u32::try_from(position).unwrap_or(u32::MAX);
        self.slot_interval.saturating_mul(slots)
    }

    /// Wait for a user that joins the back of a rotation of `queue_len`.
    pub fn global_wait(&self, queue_len: usize) -> Duration {
        self.wait_for_position(queue_len)
    }
}

/// Per-activity wait times shown to a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitTimes {
    pub posts: Duration,
    pub mentions: Duration,
}

impl WaitTimes {
    pub fn get(&self, activity: ActivityType) -> Duration {
        match activity {
            ActivityType::Posts => self.posts,
            ActivityType::Mentions => self.mentions,
        }
    }

    pub(crate) fn set(&mut self, activity: ActivityType, wait: Duration) {
        match activity {
            ActivityType::Posts => self.posts = wait,
            ActivityType::Mentions => self.mentions = wait,
        }
    }
}
