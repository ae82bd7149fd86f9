//! Character ↔ song cross-referencing within one (region, session).
//!
//! Characters and songs are standardized against their own session totals,
//! then each song's popularity is credited to every character it is
//! associated with.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;

use crate::alias::{AliasResolver, character_id};
use crate::region::SessionKey;
use crate::stats::{self, Correlation, Standardized, StatsError};
use crate::store::AggregationStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("session {0} is not in the store")]
    MissingSession(SessionKey),
    #[error("session {0} has no usable {1} total")]
    MissingTotal(SessionKey, &'static str),
    #[error("session {key}: {source}")]
    Stats { key: SessionKey, source: StatsError },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Standardized character popularity for one session.
pub fn character_popularity(store: &AggregationStore, key: SessionKey) -> Result<Vec<Standardized>> {
    store.session(&key).ok_or(AnalysisError::MissingSession(key))?;
    let total = store
        .total_votes(&key)
        .ok_or(AnalysisError::MissingTotal(key, "character"))?;
    stats::standardize(&store.character_votes(&key), total)
        .map_err(|source| AnalysisError::Stats { key, source })
}

/// Standardized song popularity for one session.
pub fn song_popularity(store: &AggregationStore, key: SessionKey) -> Result<Vec<Standardized>> {
    store.session(&key).ok_or(AnalysisError::MissingSession(key))?;
    let total = store
        .total_song_votes(&key)
        .ok_or(AnalysisError::MissingTotal(key, "song"))?;
    stats::standardize(&store.song_votes(&key), total)
        .map_err(|source| AnalysisError::Stats { key, source })
}

/// A standardized song plus the character names it is associated with.
#[derive(Debug, Clone)]
pub struct SongScore {
    pub title: String,
    pub associations: Vec<String>,
    pub share: f64,
    pub z: f64,
}

/// Song popularity credited to one character.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SongAggregate {
    pub mean_standardized: f64,
    pub mean_raw_share: f64,
    pub associated_song_count: usize,
}

/// Per-character mean of associated-song popularity, keyed by character id.
///
/// Each association is resolved to its canonical name first. A song credits
/// its full z-score and raw share to every associated character.
pub fn aggregate_song_popularity_per_character(
    songs: &[SongScore],
    resolver: &AliasResolver,
    key: SessionKey,
) -> BTreeMap<String, SongAggregate> {
    let mut sums: BTreeMap<String, (f64, f64, usize)> = BTreeMap::new();

    for song in songs {
        // One credit per character per song, even if listed twice.
        let listed: Vec<String> = song
            .associations
            .iter()
            .map(|name| character_id(&resolver.resolve(name, key.region)))
            .filter(|id| !id.is_empty())
            .collect();
        let ids: BTreeSet<String> = listed.iter().cloned().collect();
        if ids.len() < listed.len() {
            log::debug!(
                "{key}: song '{}' lists a character more than once ({}); counted once",
                song.title,
                song.associations.join("|")
            );
        }
        for id in ids {
            let e = sums.entry(id).or_insert((0.0, 0.0, 0));
            e.0 += song.z;
            e.1 += song.share;
            e.2 += 1;
        }
    }

    sums.into_iter()
        .map(|(id, (z, share, n))| {
            let count = n as f64;
            (
                id,
                SongAggregate {
                    mean_standardized: z / count,
                    mean_raw_share: share / count,
                    associated_song_count: n,
                },
            )
        })
        .collect()
}

/// A character's own popularity next to its songs' popularity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterSongRow {
    pub name: String,
    pub id: String,
    pub votes: i64,
    pub share: f64,
    pub z: f64,
    /// 0 when the character has no songs.
    pub song_mean_z: f64,
    pub song_mean_share: f64,
    pub song_count: usize,
}

impl CharacterSongRow {
    /// Song-side value for correlation: None when there are no songs.
    pub fn song_z(&self) -> Option<f64> {
        (self.song_count > 0).then_some(self.song_mean_z)
    }
}

/// Join character popularity with aggregated song popularity. Characters
/// with no songs get mean 0 and count 0.
pub fn merge_song_popularity(
    characters: &[Standardized],
    aggregates: &BTreeMap<String, SongAggregate>,
) -> Vec<CharacterSongRow> {
    characters
        .iter()
        .map(|c| {
            let id = character_id(&c.name);
            let agg = aggregates.get(&id).copied().unwrap_or_default();
            CharacterSongRow {
                name: c.name.clone(),
                id,
                votes: c.votes,
                share: c.share,
                z: c.z,
                song_mean_z: agg.mean_standardized,
                song_mean_share: agg.mean_raw_share,
                song_count: agg.associated_song_count,
            }
        })
        .collect()
}

/// The full cross-reference table for one session.
pub fn character_song_table(
    store: &AggregationStore,
    resolver: &AliasResolver,
    key: SessionKey,
) -> Result<Vec<CharacterSongRow>> {
    let characters = character_popularity(store, key)?;
    let songs: Vec<SongScore> = song_popularity(store, key)?
        .into_iter()
        .map(|s| SongScore {
            associations: store
                .songs
                .get(&s.name)
                .map(|song| song.associations.clone())
                .unwrap_or_default(),
            title: s.name,
            share: s.share,
            z: s.z,
        })
        .collect();
    let aggregates = aggregate_song_popularity_per_character(&songs, resolver, key);
    Ok(merge_song_popularity(&characters, &aggregates))
}

/// Spearman between own z and mean song z, characters with songs only.
pub fn character_song_correlation(rows: &[CharacterSongRow]) -> Correlation {
    let pairs: Vec<(Option<f64>, Option<f64>)> = rows.iter().map(|r| (Some(r.z), r.song_z())).collect();
    stats::spearman(&pairs)
}

/// Songs present in only one of two sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExclusiveSongs {
    pub only_first: Vec<String>,
    pub only_second: Vec<String>,
}

/// Titles polled in one session but not the other, each side sorted.
pub fn exclusive_songs(store: &AggregationStore, first: SessionKey, second: SessionKey) -> Result<ExclusiveSongs> {
    let a: BTreeSet<&String> = store
        .session(&first)
        .ok_or(AnalysisError::MissingSession(first))?
        .songs
        .iter()
        .collect();
    let b: BTreeSet<&String> = store
        .session(&second)
        .ok_or(AnalysisError::MissingSession(second))?
        .songs
        .iter()
        .collect();
    Ok(ExclusiveSongs {
        only_first: a.difference(&b).map(|s| s.to_string()).collect(),
        only_second: b.difference(&a).map(|s| s.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RegionData;
    use crate::region::Region;
    use crate::store::tests::{build, character, session, song};

    fn score(title: &str, assoc: &[&str], z: f64, share: f64) -> SongScore {
        SongScore {
            title: title.into(),
            associations: assoc.iter().map(|s| s.to_string()).collect(),
            share,
            z,
        }
    }

    #[test]
    fn test_song_credits_every_associated_character() {
        let key = SessionKey::new(Region::Cn, 1);
        let songs = vec![score("S", &["A", "B"], 1.5, 0.1)];
        let agg = aggregate_song_popularity_per_character(&songs, &AliasResolver::default(), key);
        assert_eq!(agg["a"].mean_standardized, 1.5);
        assert_eq!(agg["b"].mean_standardized, 1.5);
        assert_eq!(agg["a"].associated_song_count, 1);
    }

    #[test]
    fn test_repeated_association_counts_once() {
        let aliases = BTreeMap::from([("灵梦".to_string(), "博丽灵梦".to_string())]);
        let resolver = AliasResolver::new(&aliases, &BTreeMap::new(), &[]);
        let key = SessionKey::new(Region::Cn, 1);
        let songs = vec![score("S", &["博丽灵梦", "灵梦"], 1.0, 0.2), score("T", &["博丽灵梦"], 3.0, 0.4)];
        let agg = aggregate_song_popularity_per_character(&songs, &resolver, key);
        let reimu = agg[&character_id("博丽灵梦")];
        assert_eq!(reimu.associated_song_count, 2);
        assert!((reimu.mean_standardized - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_is_mean_and_resolves_aliases() {
        let aliases = BTreeMap::from([("灵梦".to_string(), "博丽灵梦".to_string())]);
        let resolver = AliasResolver::new(&aliases, &BTreeMap::new(), &[]);
        let key = SessionKey::new(Region::Cn, 1);
        let songs = vec![
            score("S1", &["博丽灵梦"], 2.0, 0.3),
            score("S2", &["灵梦"], -1.0, 0.1),
            score("S3", &[], 9.0, 0.9),
        ];
        let agg = aggregate_song_popularity_per_character(&songs, &resolver, key);
        assert_eq!(agg.len(), 1);
        let reimu = agg[&character_id("博丽灵梦")];
        assert_eq!(reimu.associated_song_count, 2);
        assert!((reimu.mean_standardized - 0.5).abs() < 1e-12);
        assert!((reimu.mean_raw_share - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_merge_defaults_to_zero() {
        let chars = vec![Standardized { name: "C".into(), votes: 10, share: 0.1, z: 0.3 }];
        let rows = merge_song_popularity(&chars, &BTreeMap::new());
        assert_eq!(rows[0].song_mean_z, 0.0);
        assert_eq!(rows[0].song_count, 0);
        assert_eq!(rows[0].song_z(), None);
    }

    fn store_with_songs() -> AggregationStore {
        let key = SessionKey::new(Region::Cn, 1);
        let mut s = session(Region::Cn, 1, 1000);
        s.total_song_votes = Some(100);
        build(
            vec![RegionData {
                region: Region::Cn,
                sessions: vec![s],
                characters: vec![
                    character(key, "A", Some(1), 500),
                    character(key, "B", Some(2), 300),
                    character(key, "C", Some(3), 200),
                ],
                songs: vec![
                    song(key, "S1", &["A"], 60),
                    song(key, "S2", &["B"], 30),
                    song(key, "S3", &["A", "B"], 10),
                ],
            }],
            &[],
        )
    }

    #[test]
    fn test_character_song_table() {
        let store = store_with_songs();
        let key = SessionKey::new(Region::Cn, 1);
        let rows = character_song_table(&store, &AliasResolver::default(), key).unwrap();
        assert_eq!(rows.len(), 3);
        let a = rows.iter().find(|r| r.name == "A").unwrap();
        assert_eq!(a.song_count, 2);
        assert!((a.song_mean_share - 0.35).abs() < 1e-12);
        let c = rows.iter().find(|r| r.name == "C").unwrap();
        assert_eq!(c.song_count, 0);

        match character_song_correlation(&rows) {
            Correlation::Rho { n, .. } => assert_eq!(n, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_session_and_total() {
        let store = store_with_songs();
        let missing = SessionKey::new(Region::Jp, 4);
        assert_eq!(
            character_popularity(&store, missing),
            Err(AnalysisError::MissingSession(missing))
        );

        let mut no_total = store.clone();
        let key = SessionKey::new(Region::Cn, 1);
        no_total.indexes.by_session.get_mut(&key).unwrap().total_votes = Some(0);
        assert_eq!(
            character_popularity(&no_total, key),
            Err(AnalysisError::MissingTotal(key, "character"))
        );
    }

    #[test]
    fn test_exclusive_songs() {
        let cn = SessionKey::new(Region::Cn, 1);
        let jp = SessionKey::new(Region::Jp, 2);
        let store = build(
            vec![
                RegionData {
                    region: Region::Cn,
                    sessions: vec![session(Region::Cn, 1, 10)],
                    characters: vec![],
                    songs: vec![song(cn, "Z", &[], 1), song(cn, "Shared", &[], 1), song(cn, "B", &[], 1)],
                },
                RegionData {
                    region: Region::Jp,
                    sessions: vec![session(Region::Jp, 2, 10)],
                    characters: vec![],
                    songs: vec![song(jp, "Shared", &[], 1), song(jp, "J", &[], 1)],
                },
            ],
            &[],
        );
        let out = exclusive_songs(&store, cn, jp).unwrap();
        assert_eq!(out.only_first, vec!["B", "Z"]);
        assert_eq!(out.only_second, vec!["J"]);
    }
}
