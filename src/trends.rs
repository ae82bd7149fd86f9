//! Longitudinal vote-share views over the store.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::crossref::{AnalysisError, Result};
use crate::region::{Region, SessionKey};
use crate::store::AggregationStore;

/// Share of each first-appearance work in one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkShares {
    pub session: SessionKey,
    /// Work code → share of the session total.
    pub shares: BTreeMap<String, f64>,
}

/// Per session of `region`: votes of grouped characters summed by work,
/// over the raw-table total. Characters with no work code are left out.
pub fn work_shares(store: &AggregationStore, region: Region) -> Vec<WorkShares> {
    let mut out = Vec::new();
    for key in store.sessions(region) {
        let Some(total) = store.total_votes(key) else {
            log::warn!("work shares: session {key} has no usable total; skipping");
            continue;
        };
        let mut shares: BTreeMap<String, f64> = BTreeMap::new();
        for (name, votes) in store.character_votes(key) {
            let Some(work) = store.characters.get(&name).and_then(|c| c.first_appear.clone()) else {
                continue;
            };
            *shares.entry(work).or_default() += votes as f64 / total as f64;
        }
        out.push(WorkShares { session: *key, shares });
    }
    out
}

/// Per session of `region`: the share held by the `n` most-voted grouped characters.
pub fn top_n_share(store: &AggregationStore, region: Region, n: usize) -> Vec<(SessionKey, f64)> {
    let mut out = Vec::new();
    for key in store.sessions(region) {
        let Some(total) = store.total_votes(key) else {
            log::warn!("top-{n} share: session {key} has no usable total; skipping");
            continue;
        };
        let mut votes: Vec<i64> = store.character_votes(key).into_iter().map(|(_, v)| v).collect();
        votes.sort_unstable_by(|a, b| b.cmp(a));
        let top: i64 = votes.iter().take(n).sum();
        out.push((*key, top as f64 / total as f64));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub session: SessionKey,
    pub rank: Option<i64>,
    pub votes: i64,
    pub share: f64,
}

/// A character's vote share in every session it appears in, both regions,
/// in session order. Sessions with no votes or no usable total are skipped.
pub fn character_trend(store: &AggregationStore, name: &str) -> Option<(String, Vec<TrendPoint>)> {
    let (canonical, character) = store.find_character(name)?;
    let points = character
        .sessions
        .iter()
        .filter_map(|(key, stats)| {
            let votes = stats.v.filter(|v| *v > 0)?;
            let total = store.total_votes(key)?;
            Some(TrendPoint {
                session: *key,
                rank: stats.r,
                votes,
                share: votes as f64 / total as f64,
            })
        })
        .collect();
    Some((canonical.clone(), points))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterComparison {
    pub name: String,
    pub first: SessionKey,
    pub second: SessionKey,
    pub first_share: Option<f64>,
    pub second_share: Option<f64>,
    /// first − second, when both shares exist.
    pub difference: Option<f64>,
}

/// A character's share in two sessions (typically one CN, one JP).
pub fn compare_character(
    store: &AggregationStore,
    name: &str,
    first: SessionKey,
    second: SessionKey,
) -> Result<Option<CharacterComparison>> {
    for key in [first, second] {
        store.session(&key).ok_or(AnalysisError::MissingSession(key))?;
    }
    let Some((canonical, character)) = store.find_character(name) else {
        return Ok(None);
    };
    let share = |key: SessionKey| -> Option<f64> {
        let votes = character.votes(&key)?;
        let total = store.total_votes(&key)?;
        Some(votes as f64 / total as f64)
    };
    let first_share = share(first);
    let second_share = share(second);
    let difference = match (first_share, second_share) {
        (Some(a), Some(b)) => Some(a - b),
        _ => None,
    };
    Ok(Some(CharacterComparison {
        name: canonical.clone(),
        first,
        second,
        first_share,
        second_share,
        difference,
    }))
}
