//! Relative tag heat: how much of a session's eligible vote share goes to
//! characters carrying a given keyword.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::region::{Region, SessionKey};
use crate::store::{AggregationStore, StoreError};

/// One session's tags, heat descending then tag ascending.
pub type TagRanking = Vec<(String, f64)>;

/// Session number → ranking, for one region.
pub type RegionRankings = BTreeMap<u32, TagRanking>;

/// Tags held by fewer characters than this are dropped.
const MIN_HOLDERS: usize = 2;

/// Relative heat for every (region, session) in the store.
///
/// A character is excluded from a session when its rank there is at or
/// above `rank_boundary` (`rank <= boundary`); a boundary of 0 or less
/// excludes nothing, and a character with no rank is never excluded.
/// Heat is the tag's share sum over the eligible share sum, 0 when the
/// eligible sum is 0. Sessions without a usable total are skipped.
pub fn compute_relative_heat(store: &AggregationStore, rank_boundary: i64) -> BTreeMap<Region, RegionRankings> {
    let tags = eligible_tags(store);
    let mut out = BTreeMap::new();

    for region in Region::ALL {
        let mut rankings = RegionRankings::new();
        for key in store.sessions(region) {
            match session_heat(store, *key, rank_boundary, &tags) {
                Some(ranking) => {
                    rankings.insert(key.number, ranking);
                }
                None => log::warn!("tag heat: session {key} has no usable total; skipping"),
            }
        }
        out.insert(region, rankings);
    }
    out
}

/// Tags with at least two holders across the whole character set.
fn eligible_tags(store: &AggregationStore) -> BTreeSet<&str> {
    let mut holders: BTreeMap<&str, usize> = BTreeMap::new();
    for c in store.characters.values() {
        for k in &c.keywords {
            *holders.entry(k.as_str()).or_default() += 1;
        }
    }
    holders
        .into_iter()
        .filter(|(_, n)| *n >= MIN_HOLDERS)
        .map(|(k, _)| k)
        .collect()
}

fn session_heat(
    store: &AggregationStore,
    key: SessionKey,
    rank_boundary: i64,
    tags: &BTreeSet<&str>,
) -> Option<TagRanking> {
    let total = store.total_votes(&key)? as f64;

    let mut eligible = 0.0;
    let mut sums: BTreeMap<&str, f64> = tags.iter().map(|t| (*t, 0.0)).collect();

    // BTreeMap iteration keeps the summation order fixed across runs.
    for c in store.characters.values() {
        let Some(stats) = c.sessions.get(&key) else { continue };
        let Some(v) = stats.v else { continue };
        let excluded = rank_boundary > 0 && stats.r.is_some_and(|r| r <= rank_boundary);
        if excluded {
            continue;
        }
        let share = v as f64 / total;
        eligible += share;
        for k in &c.keywords {
            if let Some(sum) = sums.get_mut(k.as_str()) {
                *sum += share;
            }
        }
    }

    let mut ranking: TagRanking = sums
        .into_iter()
        .map(|(tag, sum)| {
            let heat = if eligible > 0.0 { sum / eligible } else { 0.0 };
            (tag.to_string(), heat)
        })
        .collect();
    ranking.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Some(ranking)
}

/// A tag's heat in each session of a region, in session order; 0 where absent.
pub fn tag_series(rankings: &RegionRankings, tag: &str) -> Vec<(u32, f64)> {
    rankings
        .iter()
        .map(|(session, ranking)| {
            let heat = ranking.iter().find(|(t, _)| t == tag).map(|(_, h)| *h).unwrap_or(0.0);
            (*session, heat)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagDifference {
    pub tag: String,
    pub cn: f64,
    pub jp: f64,
    /// cn − jp
    pub diff: f64,
}

/// Tags whose CN and JP heat differ by at least `threshold` (a missing tag
/// counts as 0), sorted by |diff| descending then tag.
pub fn tag_region_difference(cn: &TagRanking, jp: &TagRanking, threshold: f64) -> Vec<TagDifference> {
    let cn_map: BTreeMap<&str, f64> = cn.iter().map(|(t, h)| (t.as_str(), *h)).collect();
    let jp_map: BTreeMap<&str, f64> = jp.iter().map(|(t, h)| (t.as_str(), *h)).collect();
    let all: BTreeSet<&str> = cn_map.keys().chain(jp_map.keys()).copied().collect();

    let mut out: Vec<TagDifference> = all
        .into_iter()
        .map(|tag| {
            let c = cn_map.get(tag).copied().unwrap_or(0.0);
            let j = jp_map.get(tag).copied().unwrap_or(0.0);
            TagDifference { tag: tag.to_string(), cn: c, jp: j, diff: c - j }
        })
        .filter(|d| d.diff.abs() >= threshold)
        .collect();
    out.sort_by(|a, b| b.diff.abs().total_cmp(&a.diff.abs()).then_with(|| a.tag.cmp(&b.tag)));
    out
}

/// The first `n` entries of a ranking.
pub fn top_tags(ranking: &TagRanking, n: usize) -> &[(String, f64)] {
    &ranking[..n.min(ranking.len())]
}

/// Write `tag_heat_<region>.json` per region: session number → `[[tag, heat], …]`.
pub fn write_heat_json(rankings: &BTreeMap<Region, RegionRankings>, dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let io_err = |path: &Path| {
        let path = path.display().to_string();
        move |source: std::io::Error| StoreError::Io { path, source }
    };
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let mut written = Vec::new();
    for (region, sessions) in rankings {
        let path = dir.join(format!("tag_heat_{}.json", region.code()));
        let json = serde_json::to_string_pretty(sessions).map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(&path, json).map_err(io_err(&path))?;
        written.push(path);
    }
    Ok(written)
}
