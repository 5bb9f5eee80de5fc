use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::*;
use crate::model::{ActivityEvent, EventId};
use crate::storage;

/// A fetch result reduced to what the rotation needs once the store write,
/// if any, is done.
enum Completion {
    Recorded { count: usize, newest: Option<EventId> },
    RecordFailed(String),
    Failed(FetchError),
}

/// What a single dispatch tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The current window's quota is spent.
    BudgetExhausted,
    /// The rotation is empty or every entry is backing off.
    NothingEligible,
    /// Events were fetched and recorded; the cursor advanced.
    Fetched { user_id: UserId, events: usize },
    /// Upstream refused the call; the entry waits for its next turn.
    RateLimited { user_id: UserId },
    /// Upstream rejected the credentials; the entry was removed.
    Revoked { user_id: UserId },
    /// Transient failure; the entry is skipped until `delay` has passed.
    Backoff {
        user_id: UserId,
        attempt: u32,
        delay: Duration,
        persistent: bool,
    },
    /// The entry was removed or replaced while the call was in flight.
    Discarded { user_id: UserId },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::BudgetExhausted => "budget_exhausted",
            DispatchOutcome::NothingEligible => "nothing_eligible",
            DispatchOutcome::Fetched { .. } => "fetched",
            DispatchOutcome::RateLimited { .. } => "rate_limited",
            DispatchOutcome::Revoked { .. } => "revoked",
            DispatchOutcome::Backoff {
                persistent: false, ..
            } => "backoff",
            DispatchOutcome::Backoff {
                persistent: true, ..
            } => "persistent_failure",
            DispatchOutcome::Discarded { .. } => "discarded",
        }
    }
}

impl RestQueue {
    /// Run one dispatch tick for `activity`: claim the next eligible entry,
    /// fetch its activity under the call timeout and apply the outcome.
    pub async fn dispatch_once(&self, activity: ActivityType) -> DispatchOutcome {
        let claimed = match self.claim(activity) {
            Ok(entry) => entry,
            Err(outcome) => {
                self.metrics.record_outcome(activity, outcome.label());
                return outcome;
            }
        };

        self.metrics.record_dispatch(activity);
        let fetch = self
            .fetcher
            .fetch(activity, &claimed.credentials, claimed.since_id);
        let result = match tokio::time::timeout(self.call_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.call_timeout)),
        };

        let outcome = self.complete(activity, &claimed, result).await;
        self.metrics.record_outcome(activity, outcome.label());
        outcome
    }

    /// Take a budget slot and rotate the first eligible entry to the tail.
    /// The slot is only spent if an entry is eligible.
    fn claim(&self, activity: ActivityType) -> Result<QueueEntry, DispatchOutcome> {
        let now = Instant::now();
        let mut rotation = self.rotation(activity).lock();
        rotation.budget.refresh(now);
        if rotation.budget.remaining() == 0 {
            return Err(DispatchOutcome::BudgetExhausted);
        }
        let entry = rotation
            .rotate_next(now)
            .ok_or(DispatchOutcome::NothingEligible)?;
        rotation.budget.try_consume();
        self.metrics
            .set_budget_remaining(activity, rotation.budget.remaining());
        Ok(entry)
    }

    /// Apply a fetch result to the entry it was issued for. Fetched events are
    /// recorded with no rotation lock held; the ticket is checked before the
    /// write and again before the cursor moves.
    async fn complete(
        &self,
        activity: ActivityType,
        claimed: &QueueEntry,
        result: Result<Vec<ActivityEvent>, FetchError>,
    ) -> DispatchOutcome {
        let user_id = claimed.user_id.clone();

        let completion = match result {
            Ok(events) => {
                let count = events.len();
                let newest = events.iter().map(|e| e.id).max();
                if count == 0 {
                    Completion::Recorded { count, newest }
                } else if !self.is_current(activity, claimed) {
                    debug!(%user_id, %activity, "entry changed while in flight, result discarded");
                    return DispatchOutcome::Discarded { user_id };
                } else {
                    match storage::record_on_blocking_pool(&self.store, &user_id, events).await {
                        Ok(()) => Completion::Recorded { count, newest },
                        Err(e) => {
                            warn!(
                                %user_id,
                                %activity,
                                error = %e,
                                "failed to record fetched activity"
                            );
                            Completion::RecordFailed(e.to_string())
                        }
                    }
                }
            }
            Err(e) => Completion::Failed(e),
        };

        let now = Instant::now();
        let outcome = {
            let mut rotation = self.rotation(activity).lock();
            let Some(index) = rotation.find_ticket(&user_id, claimed.ticket) else {
                debug!(%user_id, %activity, "entry changed while in flight, result discarded");
                return DispatchOutcome::Discarded { user_id };
            };

            match completion {
                Completion::Recorded { count, newest } => {
                    if let Some(entry) = rotation.entry_mut(index) {
                        entry.advance_since_id(newest);
                        entry.attempt = 0;
                        entry.next_eligible_at = now;
                    }
                    self.metrics.record_events("rest", activity, count as u64);
                    debug!(%user_id, %activity, count, "activity fetched");
                    DispatchOutcome::Fetched {
                        user_id,
                        events: count,
                    }
                }
                Completion::RecordFailed(reason) => {
                    self.back_off(rotation.entry_mut(index), activity, now, &reason)
                }
                Completion::Failed(FetchError::RateLimited {
                    remaining,
                    reset_in,
                }) => {
                    if let Some(entry) = rotation.entry_mut(index) {
                        entry.attempt = entry.attempt.saturating_add(1);
                    }
                    rotation.budget.resync(remaining, reset_in, now);
                    self.metrics
                        .set_budget_remaining(activity, rotation.budget.remaining());
                    info!(%user_id, %activity, ?remaining, ?reset_in, "rate limited by upstream");
                    DispatchOutcome::RateLimited { user_id }
                }
                Completion::Failed(FetchError::Auth(reason)) => {
                    rotation.remove_at(index);
                    self.metrics.set_rotation_length(activity, rotation.len());
                    warn!(%user_id, %activity, %reason, "credentials rejected, user removed");
                    DispatchOutcome::Revoked { user_id }
                }
                Completion::Failed(e) => {
                    self.back_off(rotation.entry_mut(index), activity, now, &e.to_string())
                }
            }
        };

        if let DispatchOutcome::Revoked { user_id } = &outcome {
            self.notifier.notify_auth_failure(user_id);
        }
        outcome
    }

    fn is_current(&self, activity: ActivityType, claimed: &QueueEntry) -> bool {
        self.rotation(activity)
            .lock()
            .find_ticket(&claimed.user_id, claimed.ticket)
            .is_some()
    }

    /// Push an entry's next eligibility out by the backoff delay for its
    /// current attempt count, then count the attempt.
    fn back_off(
        &self,
        entry: Option<&mut QueueEntry>,
        activity: ActivityType,
        now: Instant,
        reason: &str,
    ) -> DispatchOutcome {
        let Some(entry) = entry else {
            return DispatchOutcome::NothingEligible;
        };
        let delay = self.backoff.delay(entry.attempt);
        entry.next_eligible_at = now + delay;
        entry.attempt = entry.attempt.saturating_add(1);

        let persistent = entry.attempt >= self.surface_after_attempts;
        if persistent {
            error!(
                user_id = %entry.user_id,
                %activity,
                attempt = entry.attempt,
                %reason,
                "upstream keeps failing for user"
            );
        } else {
            warn!(
                user_id = %entry.user_id,
                %activity,
                attempt = entry.attempt,
                ?delay,
                %reason,
                "fetch failed, backing off"
            );
        }
        DispatchOutcome::Backoff {
            user_id: entry.user_id.clone(),
            attempt: entry.attempt,
            delay,
            persistent,
        }
    }

    /// Drive `dispatch_once` at the budget's slot interval until `shutdown`
    /// flips to true or its sender is dropped. A tick in flight at shutdown
    /// is abandoned and its result discarded.
    #[tracing::instrument(skip_all, fields(%activity))]
    pub async fn run_dispatch_loop(
        self: Arc<Self>,
        activity: ActivityType,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = self.slot_interval(activity);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?period, "dispatch loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                outcome = self.dispatch_once(activity) => {
                    debug!(outcome = outcome.label(), "dispatch tick");
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("dispatch loop stopped");
    }
}
