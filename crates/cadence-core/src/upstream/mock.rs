//! Scriptable collaborators for scheduler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{FetchError, StorageError, StorageResult};
use crate::model::{
    ActivityCursor, ActivityEvent, ActivityType, Credentials, EventId, QueueableUser, UserId,
};
use crate::storage::ActivityStore;
use crate::upstream::{ActivityFetcher, EventStream, RemovalNotifier, StreamItem};

pub fn event(id: EventId, activity_type: ActivityType) -> ActivityEvent {
    ActivityEvent {
        id,
        activity_type,
        author: "upstream".to_string(),
        text: format!("{activity_type} {id}"),
        created_at_ms: 1_700_000_000_000 + id,
    }
}

/// An event as delivered over a scripted stream.
pub fn streamed(id: EventId, activity_type: ActivityType) -> Result<StreamItem, FetchError> {
    Ok(StreamItem::Event(event(id, activity_type)))
}

/// Let spawned tasks run until they are all waiting, including store writes
/// on the blocking pool. Moves a paused clock forward by 20 ms at most.
pub async fn settle() {
    for _ in 0..20 {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn credentials(user_id: &str) -> Credentials {
    Credentials::new(format!("{user_id}-token"), format!("{user_id}-secret"))
}

/// A recorded `fetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub user_token: String,
    pub activity: ActivityType,
    pub since_id: Option<EventId>,
}

/// Sender half of a scripted open stream.
pub type StreamFeed = mpsc::Sender<Result<StreamItem, FetchError>>;

enum StreamScript {
    Fail(FetchError),
    Open(mpsc::Receiver<Result<StreamItem, FetchError>>),
}

/// Fetcher whose responses are queued per access token. Unscripted fetches
/// return an empty page; unscripted stream opens fail with a network error.
#[derive(Default)]
pub struct MockFetcher {
    fetches: Mutex<HashMap<String, VecDeque<Result<Vec<ActivityEvent>, FetchError>>>>,
    streams: Mutex<HashMap<String, VecDeque<StreamScript>>>,
    calls: Mutex<Vec<FetchCall>>,
    stream_opens: Mutex<Vec<(String, ActivityCursor)>>,
    hold_fetches: AtomicBool,
    release: Notify,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fetch(&self, user_id: &str, result: Result<Vec<ActivityEvent>, FetchError>) {
        self.fetches
            .lock()
            .entry(credentials(user_id).access_token)
            .or_default()
            .push_back(result);
    }

    pub fn push_stream_failure(&self, user_id: &str, error: FetchError) {
        self.streams
            .lock()
            .entry(credentials(user_id).access_token)
            .or_default()
            .push_back(StreamScript::Fail(error));
    }

    /// Script a stream that stays open until the returned sender is dropped.
    pub fn push_open_stream(&self, user_id: &str) -> StreamFeed {
        let (tx, rx) = mpsc::channel(64);
        self.streams
            .lock()
            .entry(credentials(user_id).access_token)
            .or_default()
            .push_back(StreamScript::Open(rx));
        tx
    }

    /// Make every subsequent fetch wait for `release_one`.
    pub fn hold_fetches(&self) {
        self.hold_fetches.store(true, Ordering::SeqCst);
    }

    pub fn release_one(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    pub fn stream_opens(&self) -> Vec<(String, ActivityCursor)> {
        self.stream_opens.lock().clone()
    }
}

#[async_trait::async_trait]
impl ActivityFetcher for MockFetcher {
    async fn fetch(
        &self,
        activity: ActivityType,
        credentials: &Credentials,
        since_id: Option<EventId>,
    ) -> Result<Vec<ActivityEvent>, FetchError> {
        self.calls.lock().push(FetchCall {
            user_token: credentials.access_token.clone(),
            activity,
            since_id,
        });
        if self.hold_fetches.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        let scripted = self
            .fetches
            .lock()
            .get_mut(&credentials.access_token)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn open_stream(
        &self,
        credentials: &Credentials,
        resume: &ActivityCursor,
    ) -> Result<EventStream, FetchError> {
        self.stream_opens
            .lock()
            .push((credentials.access_token.clone(), *resume));
        let scripted = self
            .streams
            .lock()
            .get_mut(&credentials.access_token)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(StreamScript::Open(rx)) => Ok(Box::pin(ReceiverStream::new(rx))),
            Some(StreamScript::Fail(error)) => Err(error),
            None => Err(FetchError::Network("no stream scripted".to_string())),
        }
    }
}

/// In-memory store that keeps every recorded event in arrival order.
#[derive(Default)]
pub struct MockStore {
    users: Mutex<Vec<QueueableUser>>,
    recorded: Mutex<Vec<(UserId, ActivityEvent)>>,
    failures_pending: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<QueueableUser>) -> Self {
        Self {
            users: Mutex::new(users),
            ..Self::default()
        }
    }

    /// Fail the next `n` calls to `record_activity`.
    pub fn fail_next_records(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    pub fn recorded(&self) -> Vec<(UserId, ActivityEvent)> {
        self.recorded.lock().clone()
    }

    pub fn recorded_ids(&self, user_id: &str) -> Vec<EventId> {
        self.recorded
            .lock()
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, event)| event.id)
            .collect()
    }
}

impl ActivityStore for MockStore {
    fn record_activity(&self, user_id: &str, events: &[ActivityEvent]) -> StorageResult<()> {
        let pending = self.failures_pending.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures_pending.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::RocksDb("injected failure".to_string()));
        }
        let mut recorded = self.recorded.lock();
        for event in events {
            recorded.push((user_id.to_string(), event.clone()));
        }
        Ok(())
    }

    fn load_all_queueable_users(&self) -> StorageResult<Vec<QueueableUser>> {
        Ok(self.users.lock().clone())
    }
}

/// Store whose writes park until the gate returned by `hold` is dropped.
#[derive(Default)]
pub struct GatedStore {
    gate: Mutex<()>,
    entered: AtomicBool,
    inner: MockStore,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }

    /// True once a write has started, whether or not it has finished.
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn recorded_ids(&self, user_id: &str) -> Vec<EventId> {
        self.inner.recorded_ids(user_id)
    }
}

impl ActivityStore for GatedStore {
    fn record_activity(&self, user_id: &str, events: &[ActivityEvent]) -> StorageResult<()> {
        self.entered.store(true, Ordering::SeqCst);
        let _open = self.gate.lock();
        self.inner.record_activity(user_id, events)
    }

    fn load_all_queueable_users(&self) -> StorageResult<Vec<QueueableUser>> {
        self.inner.load_all_queueable_users()
    }
}

/// Notifier that remembers which users were reported.
#[derive(Default)]
pub struct RecordingNotifier {
    notified: Mutex<Vec<UserId>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notified(&self) -> Vec<UserId> {
        self.notified.lock().clone()
    }
}

impl RemovalNotifier for RecordingNotifier {
    fn notify_auth_failure(&self, user_id: &str) {
        self.notified.lock().push(user_id.to_string());
    }
}
