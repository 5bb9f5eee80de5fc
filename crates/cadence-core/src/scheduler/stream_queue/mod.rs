mod connection;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::StreamConfig;
use crate::error::{FetchError, StreamError};
use crate::model::{ActivityCursor, Credentials, UserId};
use crate::scheduler::backoff::Backoff;
use crate::scheduler::metrics::Metrics;
use crate::storage::ActivityStore;
use crate::upstream::{ActivityFetcher, RemovalNotifier};

/// Lifecycle of one member's persistent connection.
///
/// `Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting`,
/// ending in `Disconnected` after too many consecutive failures or an
/// authentication error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        })
    }
}

/// Everything needed to start streaming a user, and everything handed back
/// when the stream is given up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSeed {
    pub user_id: UserId,
    pub screen_name: String,
    pub credentials: Credentials,
    pub cursor: ActivityCursor,
}

/// Read-only view of a stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    pub state: ConnectionState,
    pub cursor: ActivityCursor,
    pub reconnect_attempt: u32,
    pub connection_id: Uuid,
    pub last_error: Option<String>,
}

/// One member's stream, owned exclusively by the `StreamQueue`.
struct StreamConnection {
    screen_name: String,
    credentials: Credentials,
    state: ConnectionState,
    /// Last event recorded per activity type.
    cursor: ActivityCursor,
    reconnect_attempt: u32,
    /// Identifies the task driving this record. A task that finds a different
    /// id (or no record) under its user has been superseded and exits.
    connection_id: Uuid,
    last_error: Option<String>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StreamConnection {
    fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            cursor: self.cursor,
            reconnect_attempt: self.reconnect_attempt,
            connection_id: self.connection_id,
            last_error: self.last_error.clone(),
        }
    }
}

struct Shared {
    records: Mutex<HashMap<UserId, StreamConnection>>,
    fetcher: Arc<dyn ActivityFetcher>,
    store: Arc<dyn ActivityStore>,
    notifier: Arc<dyn RemovalNotifier>,
    metrics: Arc<Metrics>,
    config: StreamConfig,
    backoff: Backoff,
    shutting_down: AtomicBool,
}

impl Shared {
    fn report_connected(&self, records: &HashMap<UserId, StreamConnection>) {
        let connected = records
            .values()
            .filter(|r| r.state == ConnectionState::Connected)
            .count();
        self.metrics.set_streams_connected(connected);
    }
}

/// Streaming side of the scheduler: one persistent connection task per
/// promoted member, bounded by `max_connections`.
pub struct StreamQueue {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl StreamQueue {
    /// Must be called from within a Tokio runtime; connection tasks are
    /// spawned onto it.
    pub fn new(
        config: &StreamConfig,
        fetcher: Arc<dyn ActivityFetcher>,
        store: Arc<dyn ActivityStore>,
        notifier: Arc<dyn RemovalNotifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(HashMap::new()),
                fetcher,
                store,
                notifier,
                metrics,
                config: config.clone(),
                backoff: Backoff::from(config.backoff),
                shutting_down: AtomicBool::new(false),
            }),
            runtime: Handle::current(),
        }
    }

    /// Check whether `promote` would currently accept this user.
    pub fn check_promotable(&self, user_id: &str) -> Result<(), StreamError> {
        let records = self.shared.records.lock();
        self.admission(&records, user_id)
    }

    fn admission(
        &self,
        records: &HashMap<UserId, StreamConnection>,
        user_id: &str,
    ) -> Result<(), StreamError> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(StreamError::ShuttingDown);
        }
        if records
            .get(user_id)
            .is_some_and(|r| r.state != ConnectionState::Disconnected)
        {
            return Err(StreamError::AlreadyConnected(user_id.to_string()));
        }
        let live = records
            .values()
            .filter(|r| r.state != ConnectionState::Disconnected)
            .count();
        let max = self.shared.config.max_connections;
        if live >= max {
            return Err(StreamError::CapacityExhausted(max));
        }
        Ok(())
    }

    /// Open a stream for a member. A record left `Disconnected` by an earlier
    /// terminal failure is replaced.
    #[tracing::instrument(skip_all, fields(user_id = %seed.user_id))]
    pub fn promote(&self, seed: StreamSeed) -> Result<(), StreamError> {
        let mut records = self.shared.records.lock();
        self.admission(&records, &seed.user_id)?;

        let connection_id = Uuid::now_v7();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = self.runtime.spawn(connection::run(
            Arc::clone(&self.shared),
            seed.user_id.clone(),
            connection_id,
            cancel_rx,
        ));

        let replaced = records.insert(
            seed.user_id.clone(),
            StreamConnection {
                screen_name: seed.screen_name,
                credentials: seed.credentials,
                state: ConnectionState::Connecting,
                cursor: seed.cursor,
                reconnect_attempt: 0,
                connection_id,
                last_error: None,
                cancel: cancel_tx,
                task: Some(task),
            },
        );
        self.shared.report_connected(&records);
        info!(%connection_id, replaced = replaced.is_some(), "stream promoted");
        Ok(())
    }

    /// Stop a user's stream and hand back the seed with its latest cursor.
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub fn demote(&self, user_id: &str) -> Result<StreamSeed, StreamError> {
        let mut records = self.shared.records.lock();
        let record = records
            .remove(user_id)
            .ok_or_else(|| StreamError::NotConnected(user_id.to_string()))?;
        let _ = record.cancel.send(true);
        self.shared.report_connected(&records);
        info!(state = %record.state, "stream demoted");
        Ok(StreamSeed {
            user_id: user_id.to_string(),
            screen_name: record.screen_name,
            credentials: record.credentials,
            cursor: record.cursor,
        })
    }

    /// True only while the stream is in `Connected`.
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.state(user_id) == Some(ConnectionState::Connected)
    }

    /// True if the user has a stream record in any state.
    pub fn owns(&self, user_id: &str) -> bool {
        self.shared.records.lock().contains_key(user_id)
    }

    pub fn state(&self, user_id: &str) -> Option<ConnectionState> {
        self.shared.records.lock().get(user_id).map(|r| r.state)
    }

    pub fn status(&self, user_id: &str) -> Option<StreamStatus> {
        self.shared.records.lock().get(user_id).map(StreamConnection::status)
    }

    /// Records that are not `Disconnected`.
    pub fn live_count(&self) -> usize {
        self.shared
            .records
            .lock()
            .values()
            .filter(|r| r.state != ConnectionState::Disconnected)
            .count()
    }

    /// Cancel every connection and wait for the tasks to finish. Further
    /// promotes fail with `ShuttingDown`.
    #[tracing::instrument(skip_all)]
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let tasks: Vec<(UserId, JoinHandle<()>)> = {
            let mut records = self.shared.records.lock();
            let drained: Vec<_> = records
                .drain()
                .filter_map(|(user_id, mut record)| {
                    let _ = record.cancel.send(true);
                    record.task.take().map(|task| (user_id, task))
                })
                .collect();
            self.shared.report_connected(&records);
            drained
        };

        info!(connections = tasks.len(), "stopping streams");
        for (user_id, task) in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(%user_id, error = %e, "stream task panicked");
                }
            }
        }
    }
}
