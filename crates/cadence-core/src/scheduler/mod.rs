pub mod backoff;
pub mod budget;
pub mod handoff;
pub mod metrics;
pub mod rest_queue;
pub mod stream_queue;
pub mod wait_time;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::CadenceConfig;
use crate::error::{HandoffError, QueueError, SchedulerError};
use crate::model::{ActivityType, MembershipTier, QueueEntry};
use crate::storage::ActivityStore;
use crate::upstream::{ActivityFetcher, RemovalNotifier};

pub use handoff::ConnectionManager;
pub use metrics::Metrics;
pub use rest_queue::{DispatchOutcome, RestQueue};
pub use stream_queue::{ConnectionState, StreamQueue, StreamSeed, StreamStatus};
pub use wait_time::{WaitTimeEstimator, WaitTimes};

/// External collaborators the scheduler calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ActivityFetcher>,
    pub store: Arc<dyn ActivityStore>,
    pub notifier: Arc<dyn RemovalNotifier>,
}

/// Counts from rebuilding the queues on startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub polling: usize,
    pub streaming: usize,
}

/// The process-wide ingestion scheduler. Owns the polling rotations, the
/// member streams and the hand-off between them, and runs one dispatch task
/// per activity type once started.
///
/// Construct once, share by `Arc`. All in-memory operations are synchronous
/// and safe to call concurrently.
pub struct IngestScheduler {
    rest: Arc<RestQueue>,
    stream: Arc<StreamQueue>,
    manager: ConnectionManager,
    store: Arc<dyn ActivityStore>,
    shutdown_tx: watch::Sender<bool>,
    dispatch_tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl IngestScheduler {
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &CadenceConfig, collaborators: Collaborators) -> Self {
        Self::with_metrics(config, collaborators, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(
        config: &CadenceConfig,
        collaborators: Collaborators,
        metrics: Arc<Metrics>,
    ) -> Self {
        let Collaborators {
            fetcher,
            store,
            notifier,
        } = collaborators;
        let rest = Arc::new(RestQueue::new(
            &config.rest,
            Arc::clone(&fetcher),
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::clone(&metrics),
        ));
        let stream = Arc::new(StreamQueue::new(
            &config.stream,
            fetcher,
            Arc::clone(&store),
            notifier,
            metrics,
        ));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            manager: ConnectionManager::new(Arc::clone(&rest), Arc::clone(&stream)),
            rest,
            stream,
            store,
            shutdown_tx,
            dispatch_tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Rebuild the queues from the store: members stream (polling if their
    /// stream cannot be opened), everyone else polls both activity types.
    #[tracing::instrument(skip_all)]
    pub fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let users = self.store.load_all_queueable_users()?;
        let mut report = RecoveryReport::default();
        for user in users {
            let user_id = user.user_id.clone();
            let member = user.tier == MembershipTier::Member;
            match self.manager.enroll(user, member) {
                Ok(()) if self.stream.owns(&user_id) => report.streaming += 1,
                Ok(()) => report.polling += 1,
                Err(e) => tracing::warn!(%user_id, error = %e, "user not recovered"),
            }
        }
        info!(
            polling = report.polling,
            streaming = report.streaming,
            "scheduler state recovered"
        );
        Ok(report)
    }

    /// Spawn the dispatch loops. Must be called from within a Tokio runtime.
    #[tracing::instrument(skip_all)]
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted);
        }
        let mut tasks = self.dispatch_tasks.lock();
        for activity in ActivityType::ALL {
            let rest = Arc::clone(&self.rest);
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(rest.run_dispatch_loop(activity, shutdown)));
        }
        info!("scheduler started");
        Ok(())
    }

    /// Stop the dispatch loops and every stream, waiting for their tasks.
    #[tracing::instrument(skip_all)]
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        info!("initiating scheduler shutdown");
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.dispatch_tasks.lock().drain(..).collect();
        let mut panicked = None;
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    panicked = Some(SchedulerError::TaskPanicked(e.to_string()));
                }
            }
        }
        self.stream.shutdown().await;

        info!("scheduler shutdown complete");
        match panicked {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn add_to_queue(
        &self,
        activity: ActivityType,
        entry: QueueEntry,
    ) -> Result<(), QueueError> {
        self.manager.add_to_queue(activity, entry)
    }

    pub fn wait_time_for(
        &self,
        user_id: &str,
        activity: ActivityType,
    ) -> Result<Duration, QueueError> {
        self.rest.wait_time_for(user_id, activity)
    }

    pub fn global_wait_time(&self, activity: ActivityType) -> Duration {
        self.rest.global_wait_time(activity)
    }

    pub fn remove(&self, user_id: &str, activity: ActivityType) -> bool {
        self.manager.remove(user_id, activity)
    }

    pub fn remove_user(&self, user_id: &str) -> bool {
        self.manager.remove_user(user_id)
    }

    pub fn upgrade(&self, user_id: &str) -> Result<(), HandoffError> {
        self.manager.upgrade(user_id)
    }

    pub fn downgrade(&self, user_id: &str) -> Result<(), HandoffError> {
        self.manager.downgrade(user_id)
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.manager.is_connected(user_id)
    }

    pub fn connection_state(&self, user_id: &str) -> Option<ConnectionState> {
        self.stream.state(user_id)
    }

    /// Wait times shown on a user's activity page. A streaming member waits
    /// for nothing; a queued member sees their own position; everyone else
    /// sees how long a newcomer would wait.
    pub fn activity_wait_times(&self, user_id: &str, tier: MembershipTier) -> WaitTimes {
        let mut waits = WaitTimes::default();
        if tier == MembershipTier::Member && self.stream.is_connected(user_id) {
            return waits;
        }
        for activity in ActivityType::ALL {
            let wait = match tier {
                MembershipTier::Member => self
                    .rest
                    .wait_time_for(user_id, activity)
                    .unwrap_or_else(|_| self.rest.global_wait_time(activity)),
                MembershipTier::Standard => self.rest.global_wait_time(activity),
            };
            waits.set(activity, wait);
        }
        waits
    }

    pub fn rest_queue(&self) -> &RestQueue {
        &self.rest
    }

    pub fn stream_queue(&self) -> &StreamQueue {
        &self.stream
    }
}
