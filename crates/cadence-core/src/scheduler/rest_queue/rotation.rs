use std::collections::VecDeque;

use tokio::time::Instant;

use crate::model::{QueueEntry, UserId};
use crate::scheduler::budget::RateBudget;
use crate::scheduler::wait_time::WaitTimeEstimator;

/// FIFO rotation of polling entries for one activity type, bound to the
/// budget that paces it. At most one entry per user.
pub(crate) struct Rotation {
    entries: VecDeque<QueueEntry>,
    pub(crate) budget: RateBudget,
}

impl Rotation {
    pub(crate) fn new(budget: RateBudget) -> Self {
        Self {
            entries: VecDeque::new(),
            budget,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn position(&self, user_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.user_id == user_id)
    }

    pub(crate) fn get(&self, user_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }

    pub(crate) fn estimator(&self) -> WaitTimeEstimator {
        WaitTimeEstimator::for_budget(&self.budget)
    }

    /// Insert `entry` at the tail, or refresh the existing entry in place.
    /// A refresh replaces credentials and screen name and only ever moves
    /// `since_id` forward; position, backoff state and ticket are kept.
    /// Returns true if the entry was inserted.
    pub(crate) fn upsert(&mut self, entry: QueueEntry) -> bool {
        match self.entries.iter_mut().find(|e| e.user_id == entry.user_id) {
            Some(existing) => {
                existing.credentials = entry.credentials;
                existing.screen_name = entry.screen_name;
                existing.advance_since_id(entry.since_id);
                false
            }
            None => {
                self.entries.push_back(entry);
                true
            }
        }
    }

    /// Remove a user's entry, returning it with the position it held.
    pub(crate) fn remove(&mut self, user_id: &str) -> Option<(usize, QueueEntry)> {
        let position = self.position(user_id)?;
        self.entries.remove(position).map(|entry| (position, entry))
    }

    /// Put a previously removed entry back where it was. Positions past the
    /// tail append.
    pub(crate) fn restore(&mut self, position: usize, entry: QueueEntry) {
        if self.position(&entry.user_id).is_some() {
            return;
        }
        let position = position.min(self.entries.len());
        self.entries.insert(position, entry);
    }

    /// Move the first eligible entry to the tail and return a copy of it.
    pub(crate) fn rotate_next(&mut self, now: Instant) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|e| e.is_eligible(now))?;
        let entry = self.entries.remove(index)?;
        self.entries.push_back(entry.clone());
        Some(entry)
    }

    /// Index of the entry a dispatch was issued for, if it is still live.
    pub(crate) fn find_ticket(&self, user_id: &str, ticket: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.user_id == user_id && e.ticket == ticket)
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> Option<&mut QueueEntry> {
        self.entries.get_mut(index)
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Option<QueueEntry> {
        self.entries.remove(index)
    }

    pub(crate) fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }

    pub(crate) fn user_ids(&self) -> Vec<UserId> {
        self.entries.iter().map(|e| e.user_id.clone()).collect()
    }
}
