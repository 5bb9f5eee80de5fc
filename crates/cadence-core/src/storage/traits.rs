use crate::error::StorageResult;
use crate::model::{ActivityEvent, QueueableUser};

/// Persistence side of the experience engine, as seen by the scheduler.
/// Implementations must be thread-safe.
///
/// The scheduler holds no durable state of its own: on startup it rebuilds
/// its queues from `load_all_queueable_users`, and every ingested batch goes
/// through `record_activity`. Recording runs on the blocking pool with no
/// scheduler lock held, and may be repeated for events recorded once already
/// when a hand-off races a write.
pub trait ActivityStore: Send + Sync {
    /// Persist a batch of events for a user and advance the user's stored
    /// cursor past them. Recording an already-recorded event is a no-op.
    fn record_activity(&self, user_id: &str, events: &[ActivityEvent]) -> StorageResult<()>;

    /// All users that hold valid credentials, with their stored cursors and
    /// membership tier.
    fn load_all_queueable_users(&self) -> StorageResult<Vec<QueueableUser>>;
}
