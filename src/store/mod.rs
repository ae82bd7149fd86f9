pub mod models;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Utc;
use thiserror::Error;

use crate::alias::character_id;
use crate::loader::RegionData;
use crate::region::{Region, SessionKey};

use models::{Character, GenderSplit, Indexes, Meta, SessionIndex, Song, StoreStats};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("JSON error in {path}: {source}")]
    Json { path: String, source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The unified longitudinal model: every character and song with its
/// per-session stats in both regions, plus indexes.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AggregationStore {
    pub meta: Meta,
    pub characters: BTreeMap<String, Character>,
    pub songs: BTreeMap<String, Song>,
    pub gender: BTreeMap<SessionKey, GenderSplit>,
    pub indexes: Indexes,
}

/// Inputs to a store build.
pub struct StoreInputs<'a> {
    pub regions: &'a [RegionData],
    pub keywords: &'a BTreeMap<String, BTreeSet<String>>,
    pub gender: BTreeMap<SessionKey, GenderSplit>,
    pub gender_region: Region,
}

impl AggregationStore {
    /// Fold loaded region data into a fresh store.
    ///
    /// Characters are created on first encounter; later encounters only fill
    /// fields that are still empty. The keyword pass runs last and likewise
    /// never overwrites: keywords are unioned, and unknown names get an entry
    /// with no sessions.
    pub fn build(inputs: StoreInputs<'_>) -> Self {
        let mut store = AggregationStore::default();

        for data in inputs.regions {
            store.add_region(data);
        }
        store.add_keywords(inputs.keywords);
        store.meta.id_collisions = store.find_id_collisions();

        store.meta.missing_gender = store
            .meta
            .sessions(inputs.gender_region)
            .iter()
            .filter(|k| !inputs.gender.contains_key(k))
            .copied()
            .collect();
        for key in inputs.gender.keys() {
            if !store.indexes.by_session.contains_key(key) {
                log::warn!("gender data for {key}, which has no loaded session");
            }
        }
        store.gender = inputs.gender;
        store.meta.generated_at = Some(Utc::now());

        log::info!(
            "Built store: {} characters, {} songs, {} sessions",
            store.characters.len(),
            store.songs.len(),
            store.indexes.by_session.len()
        );
        store
    }

    fn add_region(&mut self, data: &RegionData) {
        for session in &data.sessions {
            let sessions = self.meta.sessions_mut(data.region);
            if !sessions.contains(&session.key) {
                sessions.push(session.key);
            }
            let index = self.indexes.by_session.entry(session.key).or_default();
            index.total_votes = session.total_votes;
            index.total_song_votes = session.total_song_votes;
            index.extra_works = session.extra_works.clone();
        }
        self.meta.sessions_mut(data.region).sort();

        for rec in &data.characters {
            let entry = self.characters.entry(rec.name.clone()).or_insert_with(|| Character {
                id: character_id(&rec.name),
                ..Default::default()
            });
            if entry.jp_name.is_none() {
                entry.jp_name = rec.jp_name.clone();
            }
            if entry.first_appear.is_none() {
                if let Some(work) = &rec.first_appear {
                    entry.first_appear = Some(work.clone());
                    let names = self.indexes.by_work.entry(work.clone()).or_default();
                    if !names.contains(&rec.name) {
                        names.push(rec.name.clone());
                    }
                }
            }
            if entry.sessions.insert(rec.session, rec.stats.clone()).is_some() {
                log::warn!("{}: duplicate row for '{}', keeping the last", rec.session, rec.name);
            }

            let index = self.indexes.by_session.entry(rec.session).or_default();
            if !index.chars.contains(&rec.name) {
                index.chars.push(rec.name.clone());
            }
        }

        for rec in &data.songs {
            let entry = self.songs.entry(rec.title.clone()).or_insert_with(|| Song {
                title: rec.title.clone(),
                ..Default::default()
            });
            if entry.original_title.is_none() {
                entry.original_title = rec.original_title.clone();
            }
            for name in &rec.associations {
                if !entry.associations.contains(name) {
                    entry.associations.push(name.clone());
                }
            }
            entry.sessions.insert(rec.session, rec.stats.clone());

            let index = self.indexes.by_session.entry(rec.session).or_default();
            if !index.songs.contains(&rec.title) {
                index.songs.push(rec.title.clone());
            }
        }
    }

    /// Canonical names that reduce to the same id. Id lookups resolve to the
    /// first name in key order, so every collision is reported.
    fn find_id_collisions(&self) -> BTreeMap<String, Vec<String>> {
        let mut by_id: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (name, c) in &self.characters {
            by_id.entry(c.id.as_str()).or_default().push(name.clone());
        }
        by_id
            .into_iter()
            .filter(|(_, names)| names.len() > 1)
            .map(|(id, names)| {
                log::warn!("Character id '{id}' is shared by {}", names.join(", "));
                (id.to_string(), names)
            })
            .collect()
    }

    fn add_keywords(&mut self, keywords: &BTreeMap<String, BTreeSet<String>>) {
        let mut created = 0;
        for (name, words) in keywords {
            let entry = self.characters.entry(name.clone()).or_insert_with(|| {
                created += 1;
                Character {
                    id: character_id(name),
                    ..Default::default()
                }
            });
            entry.keywords.extend(words.iter().cloned());
        }
        if created > 0 {
            log::info!("Keyword table added {created} characters with no session data");
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    pub fn sessions(&self, region: Region) -> &[SessionKey] {
        self.meta.sessions(region)
    }

    pub fn session(&self, key: &SessionKey) -> Option<&SessionIndex> {
        self.indexes.by_session.get(key)
    }

    /// Usable share denominator for a session: present and positive.
    pub fn total_votes(&self, key: &SessionKey) -> Option<i64> {
        self.session(key).and_then(|s| s.total_votes).filter(|t| *t > 0)
    }

    pub fn total_song_votes(&self, key: &SessionKey) -> Option<i64> {
        self.session(key).and_then(|s| s.total_song_votes).filter(|t| *t > 0)
    }

    /// Grouped characters of a session that have a vote count, in index order.
    pub fn character_votes(&self, key: &SessionKey) -> Vec<(String, i64)> {
        let Some(index) = self.session(key) else { return Vec::new() };
        index
            .chars
            .iter()
            .filter_map(|name| {
                let v = self.characters.get(name)?.votes(key)?;
                Some((name.clone(), v))
            })
            .collect()
    }

    pub fn song_votes(&self, key: &SessionKey) -> Vec<(String, i64)> {
        let Some(index) = self.session(key) else { return Vec::new() };
        index
            .songs
            .iter()
            .filter_map(|title| {
                let v = self.songs.get(title)?.votes(key)?;
                Some((title.clone(), v))
            })
            .collect()
    }

    /// Look up a character by canonical name or id.
    pub fn find_character(&self, name: &str) -> Option<(&String, &Character)> {
        let name = name.trim();
        if let Some(entry) = self.characters.get_key_value(name) {
            return Some(entry);
        }
        let id = character_id(name);
        self.characters.iter().find(|(_, c)| c.id == id)
    }

    pub fn stats(&self) -> StoreStats {
        let keywords: BTreeSet<&String> =
            self.characters.values().flat_map(|c| c.keywords.iter()).collect();
        StoreStats {
            generated_at: self.meta.generated_at,
            characters: self.characters.len(),
            characters_with_keywords: self.characters.values().filter(|c| !c.keywords.is_empty()).count(),
            songs: self.songs.len(),
            works: self.indexes.by_work.len(),
            sessions: Region::ALL.iter().map(|r| (*r, self.sessions(*r).len())).collect(),
            sessions_without_total: self
                .indexes
                .by_session
                .iter()
                .filter(|(_, s)| s.total_votes.is_none_or(|t| t <= 0))
                .map(|(k, _)| *k)
                .collect(),
            gender_sessions: self.gender.len(),
            missing_gender: self.meta.missing_gender.clone(),
            id_collisions: self.meta.id_collisions.len(),
            distinct_keywords: keywords.len(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::loader::{CharacterRecord, LoadedSession, SongRecord};
    use crate::store::models::EntityStats;

    pub(crate) fn stats(r: Option<i64>, v: Option<i64>) -> EntityStats {
        EntityStats { r, v, extra: BTreeMap::new() }
    }

    pub(crate) fn session(region: Region, number: u32, total: i64) -> LoadedSession {
        LoadedSession {
            key: SessionKey::new(region, number),
            total_votes: Some(total),
            total_song_votes: None,
            extra_works: Vec::new(),
        }
    }

    pub(crate) fn character(key: SessionKey, name: &str, r: Option<i64>, v: i64) -> CharacterRecord {
        CharacterRecord {
            session: key,
            name: name.to_string(),
            jp_name: None,
            first_appear: None,
            stats: stats(r, Some(v)),
        }
    }

    pub(crate) fn song(key: SessionKey, title: &str, assoc: &[&str], v: i64) -> SongRecord {
        SongRecord {
            session: key,
            title: title.to_string(),
            original_title: None,
            associations: assoc.iter().map(|s| s.to_string()).collect(),
            stats: stats(None, Some(v)),
        }
    }

    pub(crate) fn build(regions: Vec<RegionData>, keywords: &[(&str, &[&str])]) -> AggregationStore {
        let keywords: BTreeMap<String, BTreeSet<String>> = keywords
            .iter()
            .map(|(n, ks)| (n.to_string(), ks.iter().map(|k| k.to_string()).collect()))
            .collect();
        AggregationStore::build(StoreInputs {
            regions: &regions,
            keywords: &keywords,
            gender: BTreeMap::new(),
            gender_region: Region::Jp,
        })
    }

    fn two_regions() -> Vec<RegionData> {
        let cn1 = SessionKey::new(Region::Cn, 1);
        let jp3 = SessionKey::new(Region::Jp, 3);
        let mut reimu_cn = character(cn1, "博丽灵梦", Some(1), 500);
        reimu_cn.first_appear = Some("6".into());
        let mut reimu_jp = character(jp3, "博丽灵梦", Some(2), 800);
        reimu_jp.jp_name = Some("博麗霊夢".into());
        reimu_jp.first_appear = Some("1".into());
        vec![
            RegionData {
                region: Region::Cn,
                sessions: vec![session(Region::Cn, 1, 1000)],
                characters: vec![reimu_cn, character(cn1, "琪露诺", Some(2), 300)],
                songs: vec![song(cn1, "少女绮想曲", &["博丽灵梦"], 50)],
            },
            RegionData {
                region: Region::Jp,
                sessions: vec![session(Region::Jp, 3, 2000)],
                characters: vec![reimu_jp],
                songs: vec![song(jp3, "少女绮想曲", &["博丽灵梦", "雾雨魔理沙"], 70)],
            },
        ]
    }

    #[test]
    fn test_build_merges_regions_without_overwriting() {
        let store = build(two_regions(), &[]);
        let reimu = &store.characters["博丽灵梦"];
        assert_eq!(reimu.id, "博丽灵梦");
        // first encounter wins, later fills gaps only
        assert_eq!(reimu.first_appear.as_deref(), Some("6"));
        assert_eq!(reimu.jp_name.as_deref(), Some("博麗霊夢"));
        assert_eq!(reimu.sessions.len(), 2);
        assert_eq!(store.indexes.by_work["6"], vec!["博丽灵梦"]);
        assert!(!store.indexes.by_work.contains_key("1"));

        let song = &store.songs["少女绮想曲"];
        assert_eq!(song.associations, vec!["博丽灵梦", "雾雨魔理沙"]);
        assert_eq!(store.meta.cn_sessions, vec![SessionKey::new(Region::Cn, 1)]);
        assert_eq!(store.meta.missing_gender, vec![SessionKey::new(Region::Jp, 3)]);
    }

    #[test]
    fn test_keywords_union_and_create() {
        let store = build(two_regions(), &[("琪露诺", &["冰", "笨蛋"]), ("新角色", &["测试"])]);
        assert_eq!(store.characters["琪露诺"].keywords.len(), 2);
        assert_eq!(store.characters["琪露诺"].sessions.len(), 1);
        let new = &store.characters["新角色"];
        assert!(new.sessions.is_empty());
        assert_eq!(new.id, "新角色");
    }

    #[test]
    fn test_character_votes_and_totals() {
        let store = build(two_regions(), &[]);
        let cn1 = SessionKey::new(Region::Cn, 1);
        assert_eq!(store.total_votes(&cn1), Some(1000));
        assert_eq!(
            store.character_votes(&cn1),
            vec![("博丽灵梦".to_string(), 500), ("琪露诺".to_string(), 300)]
        );
        assert_eq!(store.total_votes(&SessionKey::new(Region::Cn, 9)), None);
    }

    #[test]
    fn test_id_collisions_are_recorded() {
        let cn1 = SessionKey::new(Region::Cn, 1);
        let regions = vec![RegionData {
            region: Region::Cn,
            sessions: vec![session(Region::Cn, 1, 100)],
            characters: vec![character(cn1, "A-B", Some(1), 60), character(cn1, "AB", Some(2), 40)],
            songs: Vec::new(),
        }];
        let store = build(regions, &[("Ab", &["x"])]);
        assert_eq!(store.characters.len(), 3);
        assert_eq!(store.meta.id_collisions.len(), 1);
        assert_eq!(store.meta.id_collisions["ab"], vec!["A-B", "AB", "Ab"]);
        assert_eq!(store.stats().id_collisions, 1);

        let clean = build(two_regions(), &[]);
        assert!(clean.meta.id_collisions.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/touhou_vote.json");
        let store = build(two_regions(), &[("琪露诺", &["冰"])]);
        store.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(json["indexes"]["by_session"]["1_cn"]["total_votes"].is_number());
        assert_eq!(json["characters"]["琪露诺"]["sessions"]["1_cn"]["r"], 2);

        let back = AggregationStore::load(&path).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn test_find_character_by_id() {
        let mut store = AggregationStore::default();
        store.characters.insert(
            "Reimu Hakurei".into(),
            Character { id: character_id("Reimu Hakurei"), ..Default::default() },
        );
        assert!(store.find_character("reimuhakurei").is_some());
        assert!(store.find_character("Reimu Hakurei").is_some());
        assert!(store.find_character("marisa").is_none());
    }

    #[test]
    fn test_stats() {
        let store = build(two_regions(), &[("琪露诺", &["冰", "笨蛋"])]);
        let s = store.stats();
        assert_eq!(s.characters, 2);
        assert_eq!(s.songs, 1);
        assert_eq!(s.distinct_keywords, 2);
        assert_eq!(s.sessions, vec![(Region::Cn, 1), (Region::Jp, 1)]);
        assert!(s.sessions_without_total.is_empty());
    }
}
