pub(crate) mod keys;
mod rocksdb;
mod traits;

use std::sync::Arc;

use crate::error::{StorageError, StorageResult};
use crate::model::ActivityEvent;

pub use self::rocksdb::RocksDbStorage;
pub use traits::ActivityStore;

/// Run `record_activity` on the blocking pool. Callers must not hold a
/// scheduler lock while awaiting it.
pub(crate) async fn record_on_blocking_pool(
    store: &Arc<dyn ActivityStore>,
    user_id: &str,
    events: Vec<ActivityEvent>,
) -> StorageResult<()> {
    let store = Arc::clone(store);
    let user_id = user_id.to_string();
    tokio::task::spawn_blocking(move || store.record_activity(&user_id, &events))
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}
