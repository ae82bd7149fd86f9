use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::region::{Region, SessionKey};

/// Store-wide metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    /// Sessions of the gender region that have no gender breakdown.
    #[serde(default)]
    pub missing_gender: Vec<SessionKey>,
    #[serde(default)]
    pub cn_sessions: Vec<SessionKey>,
    #[serde(default)]
    pub jp_sessions: Vec<SessionKey>,
    /// Ids shared by more than one canonical name, with the names involved.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub id_collisions: BTreeMap<String, Vec<String>>,
}

impl Meta {
    pub fn sessions(&self, region: Region) -> &[SessionKey] {
        match region {
            Region::Cn => &self.cn_sessions,
            Region::Jp => &self.jp_sessions,
        }
    }

    pub(crate) fn sessions_mut(&mut self, region: Region) -> &mut Vec<SessionKey> {
        match region {
            Region::Cn => &mut self.cn_sessions,
            Region::Jp => &mut self.jp_sessions,
        }
    }
}

/// Per-session stats for a character or song. `r` and `v` are always
/// present as keys (null when the source had no value); anything else the
/// source table carried is kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStats {
    pub r: Option<i64>,
    pub v: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    #[serde(default)]
    pub jp_name: Option<String>,
    #[serde(default)]
    pub first_appear: Option<String>,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub sessions: BTreeMap<SessionKey, EntityStats>,
}

impl Character {
    /// Votes in `key`, if the character appeared there with a count.
    pub fn votes(&self, key: &SessionKey) -> Option<i64> {
        self.sessions.get(key).and_then(|s| s.v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// Canonical translated title.
    pub title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    /// Associated character names as written in the source (first-seen order).
    #[serde(default)]
    pub associations: Vec<String>,
    #[serde(default)]
    pub sessions: BTreeMap<SessionKey, EntityStats>,
}

impl Song {
    pub fn votes(&self, key: &SessionKey) -> Option<i64> {
        self.sessions.get(key).and_then(|s| s.v)
    }
}

/// Vote totals by voter gender for one session. Zero or absent totals are null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenderSplit {
    pub m: Option<i64>,
    pub f: Option<i64>,
    pub o: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionIndex {
    /// Sum of the raw table's votes; the share denominator.
    #[serde(default)]
    pub total_votes: Option<i64>,
    #[serde(default)]
    pub total_song_votes: Option<i64>,
    #[serde(default)]
    pub chars: Vec<String>,
    #[serde(default)]
    pub songs: Vec<String>,
    /// Extra works polled alongside, from the sheet name annotation.
    #[serde(default)]
    pub extra_works: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indexes {
    /// First-appearance work code → character names, first-encounter order.
    #[serde(default)]
    pub by_work: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub by_session: BTreeMap<SessionKey, SessionIndex>,
}

/// Summary counts for the `stats` command.
#[derive(Debug)]
pub struct StoreStats {
    pub generated_at: Option<DateTime<Utc>>,
    pub characters: usize,
    pub characters_with_keywords: usize,
    pub songs: usize,
    pub works: usize,
    pub sessions: Vec<(Region, usize)>,
    pub sessions_without_total: Vec<SessionKey>,
    pub gender_sessions: usize,
    pub missing_gender: Vec<SessionKey>,
    pub id_collisions: usize,
    pub distinct_keywords: usize,
}
