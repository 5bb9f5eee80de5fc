use serde::{Deserialize, Serialize};

use crate::model::{ActivityCursor, Credentials, MembershipTier, QueueableUser, UserId};
use crate::skill::SkillSheet;

/// User record stored in the `users` column family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub user_id: UserId,
    pub screen_name: String,
    /// `None` once upstream rejected the tokens; the user is not queueable
    /// until they re-authenticate.
    pub credentials: Option<Credentials>,
    pub tier: MembershipTier,
    /// Last ingested event per activity type, persisted with every recorded
    /// batch so polling resumes where it stopped after a restart.
    pub cursor: ActivityCursor,
    #[serde(default)]
    pub skills: SkillSheet,
}

impl UserRecord {
    pub fn new(
        user_id: impl Into<UserId>,
        screen_name: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            screen_name: screen_name.into(),
            credentials: Some(credentials),
            tier: MembershipTier::Standard,
            cursor: ActivityCursor::default(),
            skills: SkillSheet::default(),
        }
    }

    /// The scheduling view of this record, if it can be scheduled at all.
    pub fn queueable(&self) -> Option<QueueableUser> {
        let credentials = self.credentials.clone()?;
        Some(QueueableUser {
            user_id: self.user_id.clone(),
            screen_name: self.screen_name.clone(),
            credentials,
            cursor: self.cursor,
            tier: self.tier,
        })
    }
}
