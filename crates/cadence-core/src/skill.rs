//! Skill sheet carried on every persisted user record.
//!
//! The experience engine classifies activity into a fixed set of sub-skills.
//! Each sub-skill has its own experience, level and rank, next to the overall
//! skill record. The engine owns the numbers; this crate only persists the
//! shape so ranking queries never have to guess it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillId {
    Books,
    Business,
    Film,
    Fitness,
    Food,
    Gaming,
    General,
    Music,
    Photography,
    Sports,
    Technology,
}

impl SkillId {
    pub const ALL: [SkillId; 11] = [
        SkillId::Books,
        SkillId::Business,
        SkillId::Film,
        SkillId::Fitness,
        SkillId::Food,
        SkillId::Gaming,
        SkillId::General,
        SkillId::Music,
        SkillId::Photography,
        SkillId::Sports,
        SkillId::Technology,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub experience: u64,
    pub level: u32,
    /// 1-based leaderboard rank; 0 until the ranking job has run.
    pub rank: u32,
}

impl Default for SkillRecord {
    fn default() -> Self {
        Self {
            experience: 0,
            level: 1,
            rank: 0,
        }
    }
}

/// Overall skill plus one record per sub-skill. Always contains every
/// `SkillId`, so lookups never fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSheet {
    pub overall: SkillRecord,
    sub_skills: BTreeMap<SkillId, SkillRecord>,
}

impl Default for SkillSheet {
    fn default() -> Self {
        Self {
            overall: SkillRecord::default(),
            sub_skills: SkillId::ALL
                .iter()
                .map(|id| (*id, SkillRecord::default()))
                .collect(),
        }
    }
}

impl SkillSheet {
    pub fn get(&self, id: SkillId) -> SkillRecord {
        self.sub_skills.get(&id).copied().unwrap_or_default()
    }

    pub fn get_mut(&mut self, id: SkillId) -> &mut SkillRecord {
        self.sub_skills.entry(id).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SkillId, &SkillRecord)> {
        self.sub_skills.iter().map(|(id, record)| (*id, record))
    }
}
