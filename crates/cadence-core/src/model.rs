use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Identifier of a registered user (the persistence layer's primary key).
pub type UserId = String;

/// Upstream event identifier. Ids grow monotonically, so they double as the
/// continuity cursor ("since id") for both polling and streaming.
pub type EventId = u64;

/// The two kinds of activity ingested per user. Each has its own rotation and
/// rate budget because the upstream API meters them separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Posts,
    Mentions,
}

impl ActivityType {
    pub const ALL: [ActivityType; 2] = [ActivityType::Posts, ActivityType::Mentions];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Posts => "posts",
            ActivityType::Mentions => "mentions",
        }
    }

    /// Dense index for per-activity arrays.
    pub(crate) fn index(&self) -> usize {
        match self {
            ActivityType::Posts => 0,
            ActivityType::Mentions => 1,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OAuth credential pair authorizing upstream calls on a user's behalf.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub secret_access_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, secret_access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            secret_access_token: secret_access_token.into(),
        }
    }
}

// Tokens must never end up in logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("secret_access_token", &"<redacted>")
            .finish()
    }
}

/// A single ingested post or mention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: EventId,
    pub activity_type: ActivityType,
    /// Screen name of the account that authored the event.
    pub author: String,
    pub text: String,
    pub created_at_ms: u64,
}

/// Per-activity continuity cursor. Streams deliver both activity types over
/// one connection, so the cursor handed between queues tracks each separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCursor {
    pub posts: Option<EventId>,
    pub mentions: Option<EventId>,
}

impl ActivityCursor {
    pub fn get(&self, activity: ActivityType) -> Option<EventId> {
        match activity {
            ActivityType::Posts => self.posts,
            ActivityType::Mentions => self.mentions,
        }
    }

    /// Move the cursor for `activity` forward to `id`. Never moves backwards.
    /// Returns true if the cursor changed.
    pub fn advance(&mut self, activity: ActivityType, id: EventId) -> bool {
        let slot = match activity {
            ActivityType::Posts => &mut self.posts,
            ActivityType::Mentions => &mut self.mentions,
        };
        if slot.is_some_and(|current| current >= id) {
            return false;
        }
        *slot = Some(id);
        true
    }

    /// True if an event with this id has already been seen for its type.
    pub fn has_seen(&self, event: &ActivityEvent) -> bool {
        self.get(event.activity_type)
            .is_some_and(|current| event.id <= current)
    }

    /// The highest event id seen across both activity types.
    pub fn high_water(&self) -> Option<EventId> {
        self.posts.max(self.mentions)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipTier {
    #[default]
    Standard,
    /// Entitled to a persistent stream instead of polling.
    Member,
}

/// A user as loaded from the persistence layer on startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueableUser {
    pub user_id: UserId,
    pub screen_name: String,
    pub credentials: Credentials,
    pub cursor: ActivityCursor,
    pub tier: MembershipTier,
}

impl QueueableUser {
    /// Build the polling entry for one activity type.
    pub fn entry_for(&self, activity: ActivityType) -> QueueEntry {
        QueueEntry::new(
            self.user_id.clone(),
            self.screen_name.clone(),
            self.credentials.clone(),
            self.cursor.get(activity),
        )
    }
}

/// Per-user scheduling record for one activity type.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub screen_name: String,
    pub credentials: Credentials,
    pub since_id: Option<EventId>,
    pub enqueued_at: Instant,
    /// The dispatch loop skips the entry until this instant has passed.
    pub next_eligible_at: Instant,
    /// Consecutive failed dispatches.
    pub attempt: u32,
    /// Assigned on insertion; lets an in-flight dispatch detect that the entry
    /// it was issued for has been removed or replaced meanwhile.
    pub(crate) ticket: u64,
}

impl QueueEntry {
    pub fn new(
        user_id: impl Into<UserId>,
        screen_name: impl Into<String>,
        credentials: Credentials,
        since_id: Option<EventId>,
    ) -> Self {
        let now = Instant::now();
        Self {
            user_id: user_id.into(),
            screen_name: screen_name.into(),
            credentials,
            since_id,
            enqueued_at: now,
            next_eligible_at: now,
            attempt: 0,
            ticket: 0,
        }
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        self.next_eligible_at <= now
    }

    /// Forward-only cursor update.
    pub(crate) fn advance_since_id(&mut self, id: Option<EventId>) {
        self.since_id = self.since_id.max(id);
    }
}
