use std::sync::Arc;

use cadence_core::{RemovalNotifier, RocksDbStorage};
use tracing::{error, warn};

/// Revokes a user's stored tokens once upstream rejects them, so the user is
/// not queued again on restart until they re-authenticate.
pub struct RevokingNotifier {
    storage: Arc<RocksDbStorage>,
}

impl RevokingNotifier {
    pub fn new(storage: Arc<RocksDbStorage>) -> Self {
        Self { storage }
    }
}

impl RemovalNotifier for RevokingNotifier {
    fn notify_auth_failure(&self, user_id: &str) {
        match self.storage.revoke_credentials(user_id) {
            Ok(true) => warn!(%user_id, "credentials revoked after upstream rejection"),
            Ok(false) => warn!(%user_id, "rejected user has no stored record"),
            Err(e) => error!(%user_id, error = %e, "failed to revoke credentials"),
        }
    }
}
