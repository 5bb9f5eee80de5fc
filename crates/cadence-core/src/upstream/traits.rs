use std::pin::Pin;

use tokio_stream::Stream;

use crate::error::FetchError;
use crate::model::{ActivityCursor, ActivityEvent, ActivityType, Credentials, EventId};

/// One item read from a persistent upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Event(ActivityEvent),
    /// Upstream is alive but had nothing to deliver. Resets the idle timer.
    KeepAlive,
}

/// Lazily produced items from a persistent upstream connection. The stream
/// ends (`None`) or yields an `Err` when the connection drops.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamItem, FetchError>> + Send>>;

/// Client for the rate-limited third-party activity API. Implementations must
/// be thread-safe; the scheduler wraps every call in a timeout.
#[async_trait::async_trait]
pub trait ActivityFetcher: Send + Sync {
    /// Fetch events of one activity type newer than `since_id`
    /// (`None` = most recent page).
    async fn fetch(
        &self,
        activity: ActivityType,
        credentials: &Credentials,
        since_id: Option<EventId>,
    ) -> Result<Vec<ActivityEvent>, FetchError>;

    /// Open a persistent connection delivering both activity types. `resume`
    /// is a hint the upstream may use to backfill events missed since the last
    /// connection; duplicates are filtered by the caller.
    async fn open_stream(
        &self,
        credentials: &Credentials,
        resume: &ActivityCursor,
    ) -> Result<EventStream, FetchError>;
}

/// Told when a user is dropped because upstream rejected their credentials.
/// The user must re-authenticate before being queued again.
pub trait RemovalNotifier: Send + Sync {
    fn notify_auth_failure(&self, user_id: &str);
}
