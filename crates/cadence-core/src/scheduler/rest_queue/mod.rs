mod dispatch;
pub(crate) mod rotation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RestConfig;
use crate::error::{FetchError, QueueError};
use crate::model::{ActivityType, QueueEntry, UserId};
use crate::scheduler::backoff::Backoff;
use crate::scheduler::budget::RateBudget;
use crate::scheduler::metrics::Metrics;
use crate::storage::ActivityStore;
use crate::upstream::{ActivityFetcher, RemovalNotifier};

pub use dispatch::DispatchOutcome;

use rotation::Rotation;

/// Polling side of the scheduler: one fair rotation per activity type, each
/// paced by its own rate budget.
///
/// All methods except the dispatch itself are synchronous and only hold a
/// rotation lock for the duration of an in-memory update.
pub struct RestQueue {
    rotations: [Mutex<Rotation>; 2],
    fetcher: Arc<dyn ActivityFetcher>,
    store: Arc<dyn ActivityStore>,
    notifier: Arc<dyn RemovalNotifier>,
    metrics: Arc<Metrics>,
    backoff: Backoff,
    call_timeout: Duration,
    surface_after_attempts: u32,
    next_ticket: AtomicU64,
}

impl RestQueue {
    pub fn new(
        config: &RestConfig,
        fetcher: Arc<dyn ActivityFetcher>,
        store: Arc<dyn ActivityStore>,
        notifier: Arc<dyn RemovalNotifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let rotation_for = |activity: ActivityType| {
            let budget = config.budget(activity);
            Mutex::new(Rotation::new(RateBudget::new(budget.window(), budget.quota)))
        };
        Self {
            rotations: [
                rotation_for(ActivityType::Posts),
                rotation_for(ActivityType::Mentions),
            ],
            fetcher,
            store,
            notifier,
            metrics,
            backoff: Backoff::from(config.backoff),
            call_timeout: config.call_timeout(),
            surface_after_attempts: config.surface_after_attempts,
            next_ticket: AtomicU64::new(1),
        }
    }

    fn rotation(&self, activity: ActivityType) -> &Mutex<Rotation> {
        &self.rotations[activity.index()]
    }

    /// Insert a user at the tail of the rotation, or refresh their entry in
    /// place. Returns true if the user was not queued before.
    pub fn add_to_queue(&self, activity: ActivityType, mut entry: QueueEntry) -> bool {
        let user_id = entry.user_id.clone();
        entry.ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (inserted, len) = {
            let mut rotation = self.rotation(activity).lock();
            let inserted = rotation.upsert(entry);
            (inserted, rotation.len())
        };
        self.metrics.set_rotation_length(activity, len);
        if inserted {
            debug!(%user_id, %activity, position = len - 1, "user queued");
        } else {
            debug!(%user_id, %activity, "queue entry refreshed");
        }
        inserted
    }

    /// Estimated wait until this user's next dispatch.
    pub fn wait_time_for(
        &self,
        user_id: &str,
        activity: ActivityType,
    ) -> Result<Duration, QueueError> {
        let rotation = self.rotation(activity).lock();
        let position = rotation
            .position(user_id)
            .ok_or_else(|| QueueError::NotQueued(user_id.to_string(), activity))?;
        Ok(rotation.estimator().wait_for_position(position))
    }

    /// Estimated wait for a user joining the back of the rotation now.
    pub fn global_wait_time(&self, activity: ActivityType) -> Duration {
        let rotation = self.rotation(activity).lock();
        rotation.estimator().global_wait(rotation.len())
    }

    /// Drop a user's entry. Removing an absent user is a no-op.
    /// Returns true if an entry was removed.
    pub fn remove(&self, user_id: &str, activity: ActivityType) -> bool {
        self.take(user_id, activity).is_some()
    }

    pub fn contains(&self, user_id: &str, activity: ActivityType) -> bool {
        self.rotation(activity).lock().position(user_id).is_some()
    }

    pub fn len(&self, activity: ActivityType) -> usize {
        self.rotation(activity).lock().len()
    }

    pub fn is_empty(&self, activity: ActivityType) -> bool {
        self.len(activity) == 0
    }

    /// User ids in rotation order.
    pub fn queued_users(&self, activity: ActivityType) -> Vec<UserId> {
        self.rotation(activity).lock().user_ids()
    }

    /// Copy of a user's entry, if queued.
    pub fn entry(&self, user_id: &str, activity: ActivityType) -> Option<QueueEntry> {
        self.rotation(activity).lock().get(user_id).cloned()
    }

    /// Copy of all entries in rotation order.
    pub fn snapshot(&self, activity: ActivityType) -> Vec<QueueEntry> {
        self.rotation(activity).lock().snapshot()
    }

    /// Calls left in the current rate window.
    pub fn budget_remaining(&self, activity: ActivityType) -> u32 {
        let mut rotation = self.rotation(activity).lock();
        rotation.budget.refresh(Instant::now());
        rotation.budget.remaining()
    }

    /// Dispatch spacing for one activity type.
    pub fn slot_interval(&self, activity: ActivityType) -> Duration {
        self.rotation(activity).lock().budget.slot_interval()
    }

    /// Remove an entry and report the position it held, for hand-off.
    pub(crate) fn take(
        &self,
        user_id: &str,
        activity: ActivityType,
    ) -> Option<(usize, QueueEntry)> {
        let (taken, len) = {
            let mut rotation = self.rotation(activity).lock();
            let taken = rotation.remove(user_id);
            (taken, rotation.len())
        };
        if taken.is_some() {
            self.metrics.set_rotation_length(activity, len);
            debug!(%user_id, %activity, "user dequeued");
        }
        taken
    }

    /// Undo a `take`.
    pub(crate) fn restore(&self, activity: ActivityType, position: usize, entry: QueueEntry) {
        let len = {
            let mut rotation = self.rotation(activity).lock();
            rotation.restore(position, entry);
            rotation.len()
        };
        self.metrics.set_rotation_length(activity, len);
    }
}

#[cfg(test)]
mod tests;
