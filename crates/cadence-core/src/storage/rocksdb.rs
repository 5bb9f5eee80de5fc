use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded, Options,
    WriteBatch,
};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::model::{ActivityEvent, ActivityType, MembershipTier, QueueableUser};
use crate::storage::keys;
use crate::storage::traits::ActivityStore;
use crate::user::UserRecord;

const CF_USERS: &str = "users";
const CF_EVENTS: &str = "events";

/// All column family names (excluding `default` which RocksDB creates automatically).
const COLUMN_FAMILIES: &[&str] = &[CF_USERS, CF_EVENTS];

type DB = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed user and activity store.
pub struct RocksDbStorage {
    db: DB,
    /// Serializes read-modify-write cycles on user records. Posts and mentions
    /// are dispatched concurrently and both advance the same record's cursor.
    user_writes: Mutex<()>,
}

impl RocksDbStorage {
    /// Open or create a RocksDB database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self {
            db,
            user_writes: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::RocksDb(format!("column family not found: {name}")))
    }

    /// Insert or replace a user record.
    pub fn put_user(&self, user: &UserRecord) -> StorageResult<()> {
        let _guard = self.user_writes.lock();
        self.write_user(user)
    }

    fn write_user(&self, user: &UserRecord) -> StorageResult<()> {
        let cf = self.cf(CF_USERS)?;
        let value = serde_json::to_vec(user)?;
        self.db.put_cf(&cf, keys::user_key(&user.user_id), &value)?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> StorageResult<Option<UserRecord>> {
        let cf = self.cf(CF_USERS)?;
        match self.db.get_cf(&cf, keys::user_key(user_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete a user record together with all of its recorded events.
    pub fn delete_user(&self, user_id: &str) -> StorageResult<()> {
        let _guard = self.user_writes.lock();
        let users = self.cf(CF_USERS)?;
        let events = self.cf(CF_EVENTS)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&users, keys::user_key(user_id));

        let prefix = keys::user_prefix(user_id);
        let iter = self
            .db
            .iterator_cf(&events, IteratorMode::From(&prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            batch.delete_cf(&events, key);
        }

        self.db.write(batch)?;
        Ok(())
    }

    /// Change a user's membership tier. Returns false if the user is unknown.
    pub fn set_member(&self, user_id: &str, tier: MembershipTier) -> StorageResult<bool> {
        self.update_user(user_id, |user| user.tier = tier)
    }

    /// Drop a user's stored tokens so they are no longer queueable.
    /// Returns false if the user is unknown.
    pub fn revoke_credentials(&self, user_id: &str) -> StorageResult<bool> {
        self.update_user(user_id, |user| user.credentials = None)
    }

    fn update_user(
        &self,
        user_id: &str,
        apply: impl FnOnce(&mut UserRecord),
    ) -> StorageResult<bool> {
        let _guard = self.user_writes.lock();
        let Some(mut user) = self.get_user(user_id)? else {
            return Ok(false);
        };
        apply(&mut user);
        self.write_user(&user)?;
        Ok(true)
    }

    /// Recorded events for one user and activity type, in id order.
    pub fn list_events(
        &self,
        user_id: &str,
        activity: ActivityType,
    ) -> StorageResult<Vec<ActivityEvent>> {
        let cf = self.cf(CF_EVENTS)?;
        let prefix = keys::event_prefix(user_id, activity);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward));
        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            results.push(serde_json::from_slice(&value)?);
        }
        Ok(results)
    }

    /// All stored user records.
    pub fn list_users(&self) -> StorageResult<Vec<UserRecord>> {
        let cf = self.cf(CF_USERS)?;
        let mut results = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            results.push(serde_json::from_slice(&value)?);
        }
        Ok(results)
    }
}

impl ActivityStore for RocksDbStorage {
    fn record_activity(&self, user_id: &str, events: &[ActivityEvent]) -> StorageResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let _guard = self.user_writes.lock();
        let Some(mut user) = self.get_user(user_id)? else {
            warn!(%user_id, count = events.len(), "dropping activity for unknown user");
            return Ok(());
        };

        let events_cf = self.cf(CF_EVENTS)?;
        let mut batch = WriteBatch::default();
        for event in events {
            let value = serde_json::to_vec(event)?;
            batch.put_cf(
                &events_cf,
                keys::event_key(user_id, event.activity_type, event.id),
                &value,
            );
            user.cursor.advance(event.activity_type, event.id);
        }
        batch.put_cf(
            &self.cf(CF_USERS)?,
            keys::user_key(user_id),
            serde_json::to_vec(&user)?,
        );

        self.db.write(batch)?;
        debug!(%user_id, count = events.len(), "recorded activity");
        Ok(())
    }

    fn load_all_queueable_users(&self) -> StorageResult<Vec<QueueableUser>> {
        Ok(self
            .list_users()?
            .iter()
            .filter_map(UserRecord::queueable)
            .collect())
    }
}
