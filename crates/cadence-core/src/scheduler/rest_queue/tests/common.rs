use super::*;
use crate::scheduler::metrics::test_harness::MetricTestHarness;

pub(super) struct Fixture {
    pub queue: Arc<RestQueue>,
    pub fetcher: Arc<MockFetcher>,
    pub store: Arc<MockStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub harness: MetricTestHarness,
}

/// 15 calls per 900 s for both activity types, 1 s base backoff.
pub(super) fn test_config() -> RestConfig {
    RestConfig {
        posts: BudgetConfig {
            window_secs: 900,
            quota: 15,
        },
        mentions: BudgetConfig {
            window_secs: 900,
            quota: 15,
        },
        call_timeout_ms: 10_000,
        surface_after_attempts: 3,
        backoff: BackoffConfig {
            base_ms: 1_000,
            max_ms: 60_000,
        },
    }
}

pub(super) fn test_setup() -> Fixture {
    test_setup_with_config(test_config())
}

pub(super) fn test_setup_with_config(config: RestConfig) -> Fixture {
    let fetcher = Arc::new(MockFetcher::new());
    let store = Arc::new(MockStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let harness = MetricTestHarness::new();
    let queue = Arc::new(RestQueue::new(
        &config,
        fetcher.clone(),
        store.clone(),
        notifier.clone(),
        harness.metrics.clone(),
    ));
    Fixture {
        queue,
        fetcher,
        store,
        notifier,
        harness,
    }
}

pub(super) fn test_entry(user_id: &str, since_id: Option<u64>) -> QueueEntry {
    QueueEntry::new(user_id, format!("{user_id}_name"), credentials(user_id), since_id)
}

/// Queue the given users for posts, in order.
pub(super) fn queue_posts(queue: &RestQueue, users: &[&str]) {
    for user in users {
        queue.add_to_queue(ActivityType::Posts, test_entry(user, None));
    }
}
