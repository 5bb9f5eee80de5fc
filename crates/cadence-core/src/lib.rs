pub mod config;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod skill;
pub mod storage;
pub mod telemetry;
pub mod upstream;
pub mod user;

pub use config::CadenceConfig;
pub use error::{
    FetchError, HandoffError, QueueError, SchedulerError, StorageError, StorageResult, StreamError,
};
pub use model::{
    ActivityCursor, ActivityEvent, ActivityType, Credentials, EventId, MembershipTier, QueueEntry,
    QueueableUser, UserId,
};
pub use scheduler::{Collaborators, IngestScheduler, RecoveryReport, WaitTimes};
pub use storage::{ActivityStore, RocksDbStorage};
pub use upstream::{ActivityFetcher, EventStream, RemovalNotifier, StreamItem};
pub use user::UserRecord;
