use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{HandoffError, QueueError, StreamError};
use crate::model::{ActivityCursor, ActivityType, QueueEntry, QueueableUser};
use crate::scheduler::rest_queue::RestQueue;
use crate::scheduler::stream_queue::{StreamQueue, StreamSeed};

/// Moves users between polling and streaming.
///
/// Every operation that changes which queue owns a user runs under one
/// linearization lock, so a user is never owned by both queues or by
/// neither. Holds no state of its own besides that lock.
pub struct ConnectionManager {
    rest: Arc<RestQueue>,
    stream: Arc<StreamQueue>,
    lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(rest: Arc<RestQueue>, stream: Arc<StreamQueue>) -> Self {
        Self {
            rest,
            stream,
            lock: Mutex::new(()),
        }
    }

    /// Queue a user for polling. A streamed user covers both activity types,
    /// so any stream record conflicts.
    pub fn add_to_queue(
        &self,
        activity: ActivityType,
        entry: QueueEntry,
    ) -> Result<(), QueueError> {
        let _guard = self.lock.lock();
        if self.stream.owns(&entry.user_id) {
            return Err(QueueError::AlreadyStreaming(entry.user_id));
        }
        self.rest.add_to_queue(activity, entry);
        Ok(())
    }

    pub fn remove(&self, user_id: &str, activity: ActivityType) -> bool {
        let _guard = self.lock.lock();
        self.rest.remove(user_id, activity)
    }

    /// Forget a user entirely: both rotations and any stream.
    /// Returns true if anything was removed.
    pub fn remove_user(&self, user_id: &str) -> bool {
        let _guard = self.lock.lock();
        let mut removed = false;
        for activity in ActivityType::ALL {
            removed |= self.rest.remove(user_id, activity);
        }
        removed |= self.stream.demote(user_id).is_ok();
        removed
    }

    /// Move a user's polling entries into a stream. On failure the entries
    /// are put back where they were.
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub fn upgrade(&self, user_id: &str) -> Result<(), HandoffError> {
        let _guard = self.lock.lock();
        if self.stream.owns(user_id) {
            return Err(StreamError::AlreadyConnected(user_id.to_string()).into());
        }

        let taken = ActivityType::ALL.map(|activity| self.rest.take(user_id, activity));
        let Some((_, template)) = taken.iter().flatten().next() else {
            return Err(HandoffError::NotQueued(user_id.to_string()));
        };

        let mut cursor = ActivityCursor::default();
        for (activity, slot) in ActivityType::ALL.iter().zip(&taken) {
            if let Some(id) = slot.as_ref().and_then(|(_, entry)| entry.since_id) {
                cursor.advance(*activity, id);
            }
        }
        let seed = StreamSeed {
            user_id: user_id.to_string(),
            screen_name: template.screen_name.clone(),
            credentials: template.credentials.clone(),
            cursor,
        };

        if let Err(e) = self.stream.promote(seed) {
            warn!(error = %e, "promotion failed, restoring polling entries");
            for (activity, slot) in ActivityType::ALL.into_iter().zip(taken) {
                if let Some((position, entry)) = slot {
                    self.rest.restore(activity, position, entry);
                }
            }
            return Err(e.into());
        }
        info!(?cursor, "user upgraded to streaming");
        Ok(())
    }

    /// Stop a user's stream and resume polling both activity types from the
    /// stream's last cursor.
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub fn downgrade(&self, user_id: &str) -> Result<(), HandoffError> {
        let _guard = self.lock.lock();
        let seed = self.stream.demote(user_id)?;
        self.requeue(&seed);
        info!(cursor = ?seed.cursor, "user downgraded to polling");
        Ok(())
    }

    /// Place a freshly loaded user: members stream, everyone else polls.
    /// A member whose stream cannot be opened polls instead.
    pub fn enroll(&self, user: QueueableUser, prefer_stream: bool) -> Result<(), HandoffError> {
        let _guard = self.lock.lock();
        if self.stream.owns(&user.user_id) {
            return Err(QueueError::AlreadyStreaming(user.user_id).into());
        }
        let seed = StreamSeed {
            user_id: user.user_id,
            screen_name: user.screen_name,
            credentials: user.credentials,
            cursor: user.cursor,
        };
        if prefer_stream {
            match self.stream.promote(seed.clone()) {
                Ok(()) => return Ok(()),
                Err(e @ StreamError::ShuttingDown) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        user_id = %seed.user_id,
                        error = %e,
                        "member cannot stream, polling instead"
                    );
                }
            }
        }
        self.requeue(&seed);
        Ok(())
    }

    fn requeue(&self, seed: &StreamSeed) {
        for activity in ActivityType::ALL {
            self.rest.add_to_queue(
                activity,
                QueueEntry::new(
                    seed.user_id.clone(),
                    seed.screen_name.clone(),
                    seed.credentials.clone(),
                    seed.cursor.get(activity),
                ),
            );
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.stream.is_connected(user_id)
    }
}
