//! Outlier detection over the character/song cross-reference.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crossref::CharacterSongRow;
use crate::region::Region;
use crate::stats::{RatioOutcome, UndefinedReason, deviation_magnitude};

/// How the two extremity tests combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutlierMode {
    /// Exactly one side is extreme. "Both extreme" never fires.
    #[default]
    StrictXor,
    /// Either side is extreme, so "both extreme" is reachable.
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierKind {
    BothExtreme,
    SelfOnly,
    SongsOnly,
}

impl OutlierKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::BothExtreme => "both extreme",
            Self::SelfOnly => "character only",
            Self::SongsOnly => "songs only",
        }
    }
}

/// Classify a (self z, song z) pair against threshold `t`.
pub fn classify(self_z: f64, song_z: f64, t: f64, mode: OutlierMode) -> Option<OutlierKind> {
    let a = self_z.abs() > t;
    let b = song_z.abs() > t;
    let candidate = match mode {
        OutlierMode::StrictXor => a ^ b,
        OutlierMode::Either => a || b,
    };
    if !candidate {
        return None;
    }
    Some(match (a, b) {
        (true, true) => OutlierKind::BothExtreme,
        (true, false) => OutlierKind::SelfOnly,
        _ => OutlierKind::SongsOnly,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalOutlier {
    pub name: String,
    pub z: f64,
    pub song_mean_z: f64,
    pub song_count: usize,
    pub kind: OutlierKind,
}

/// Characters whose own popularity and song popularity disagree.
///
/// Sorted by magnitude, not signed value: |own z| descending, then |song z|
/// descending, so a strongly unpopular character ranks next to a strongly
/// popular one.
pub fn internal_outliers(rows: &[CharacterSongRow], threshold: f64, mode: OutlierMode) -> Vec<InternalOutlier> {
    let mut out: Vec<InternalOutlier> = rows
        .iter()
        .filter_map(|r| {
            let kind = classify(r.z, r.song_mean_z, threshold, mode)?;
            Some(InternalOutlier {
                name: r.name.clone(),
                z: r.z,
                song_mean_z: r.song_mean_z,
                song_count: r.song_count,
                kind,
            })
        })
        .collect();
    out.sort_by(|a, b| {
        b.z.abs()
            .total_cmp(&a.z.abs())
            .then(b.song_mean_z.abs().total_cmp(&a.song_mean_z.abs()))
            .then_with(|| a.name.cmp(&b.name))
    });
    out
}

/// One character's CN/JP ratio comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioDeviation {
    pub name: String,
    pub char_ratio: f64,
    pub music_ratio: f64,
    /// max(char_ratio, 1 / char_ratio)
    pub char_magnitude: f64,
    /// max(music_ratio, 1 / music_ratio)
    pub music_magnitude: f64,
    /// char_ratio / music_ratio
    pub deviation: f64,
    /// max(deviation, 1 / deviation)
    pub magnitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RatioReport {
    /// Sorted by magnitude descending.
    pub flagged: Vec<RatioDeviation>,
    /// Characters in both regions whose ratios are within threshold.
    pub within: usize,
    /// CN-only characters first, then JP-only, then zero or missing shares.
    pub undefined: Vec<(String, UndefinedReason)>,
}

/// Compare each character's CN/JP popularity ratio with its songs' CN/JP
/// ratio. Characters are joined by id. A character polled in only one
/// region, or with any zero or missing share, gets an undefined ratio.
pub fn ratio_deviations(cn: &[CharacterSongRow], jp: &[CharacterSongRow], threshold: f64) -> RatioReport {
    let jp_by_id: BTreeMap<&str, &CharacterSongRow> = jp.iter().map(|r| (r.id.as_str(), r)).collect();
    let cn_ids: BTreeSet<&str> = cn.iter().map(|r| r.id.as_str()).collect();
    let mut report = RatioReport::default();

    for c in cn.iter().filter(|c| !jp_by_id.contains_key(c.id.as_str())) {
        report.undefined.push((c.name.clone(), UndefinedReason::AbsentInRegion(Region::Jp)));
    }
    for j in jp.iter().filter(|j| !cn_ids.contains(j.id.as_str())) {
        report.undefined.push((j.name.clone(), UndefinedReason::AbsentInRegion(Region::Cn)));
    }

    for c in cn {
        let Some(j) = jp_by_id.get(c.id.as_str()) else { continue };

        let char_ratio = RatioOutcome::positive(Some(c.share), Some(j.share), "character share");
        let music_ratio = RatioOutcome::positive(
            (c.song_count > 0).then_some(c.song_mean_share),
            (j.song_count > 0).then_some(j.song_mean_share),
            "song share",
        );
        let (char_ratio, music_ratio) = match (char_ratio, music_ratio) {
            (RatioOutcome::Defined(a), RatioOutcome::Defined(b)) => (a, b),
            (RatioOutcome::Undefined(reason), _) | (_, RatioOutcome::Undefined(reason)) => {
                report.undefined.push((c.name.clone(), reason));
                continue;
            }
        };

        let deviation = char_ratio / music_ratio;
        if (deviation - 1.0).abs() > threshold {
            report.flagged.push(RatioDeviation {
                name: c.name.clone(),
                char_ratio,
                music_ratio,
                char_magnitude: deviation_magnitude(char_ratio),
                music_magnitude: deviation_magnitude(music_ratio),
                deviation,
                magnitude: deviation_magnitude(deviation),
            });
        } else {
            report.within += 1;
        }
    }

    report.flagged.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude).then_with(|| a.name.cmp(&b.name)));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::character_id;

    fn row(name: &str, share: f64, z: f64, song_share: f64, song_z: f64, songs: usize) -> CharacterSongRow {
        CharacterSongRow {
            name: name.into(),
            id: character_id(name),
            votes: 0,
            share,
            z,
            song_mean_z: song_z,
            song_mean_share: song_share,
            song_count: songs,
        }
    }

    #[test]
    fn test_strict_xor_cases() {
        let t = 2.5;
        assert_eq!(classify(3.0, 0.5, t, OutlierMode::StrictXor), Some(OutlierKind::SelfOnly));
        assert_eq!(classify(0.5, -3.0, t, OutlierMode::StrictXor), Some(OutlierKind::SongsOnly));
        assert_eq!(classify(3.0, 3.0, t, OutlierMode::StrictXor), None);
        assert_eq!(classify(0.1, 0.2, t, OutlierMode::StrictXor), None);
    }

    #[test]
    fn test_either_mode_reaches_both() {
        let t = 2.5;
        assert_eq!(classify(3.0, 3.0, t, OutlierMode::Either), Some(OutlierKind::BothExtreme));
        assert_eq!(classify(3.0, 0.5, t, OutlierMode::Either), Some(OutlierKind::SelfOnly));
        assert_eq!(classify(0.1, 0.2, t, OutlierMode::Either), None);
    }

    #[test]
    fn test_threshold_is_strict() {
        assert_eq!(classify(2.5, 0.0, 2.5, OutlierMode::StrictXor), None);
    }

    #[test]
    fn test_internal_outliers_sorted() {
        let rows = vec![
            row("A", 0.1, 2.6, 0.0, 0.0, 1),
            row("B", 0.1, -4.0, 0.0, 0.0, 1),
            row("C", 0.1, 0.0, 0.0, 3.0, 1),
            row("D", 0.1, 3.0, 0.0, 3.0, 1),
        ];
        let out = internal_outliers(&rows, 2.5, OutlierMode::StrictXor);
        let names: Vec<&str> = out.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);

        let either = internal_outliers(&rows, 2.5, OutlierMode::Either);
        assert_eq!(either.len(), 4);
        assert_eq!(either[1].name, "D");
        assert_eq!(either[1].kind, OutlierKind::BothExtreme);
    }

    #[test]
    fn test_ratio_magnitude_symmetric() {
        // char_ratio 2.0 against music_ratio 1.0, and 0.5 against 1.0
        let cn = vec![row("X", 0.2, 0.0, 0.1, 0.0, 1), row("Y", 0.05, 0.0, 0.1, 0.0, 1)];
        let jp = vec![row("X", 0.1, 0.0, 0.1, 0.0, 1), row("Y", 0.1, 0.0, 0.1, 0.0, 1)];
        let report = ratio_deviations(&cn, &jp, 0.4);
        assert_eq!(report.flagged.len(), 2);
        for f in &report.flagged {
            assert!((f.magnitude - 2.0).abs() < 1e-12, "{} magnitude {}", f.name, f.magnitude);
        }
        assert!(report.flagged.iter().all(|f| f.magnitude.is_finite()));
    }

    #[test]
    fn test_ratio_undefined_excluded() {
        let cn = vec![
            row("NoSongs", 0.2, 0.0, 0.0, 0.0, 0),
            row("ZeroShare", 0.0, 0.0, 0.1, 0.0, 1),
            row("Fine", 0.1, 0.0, 0.1, 0.0, 1),
            row("CnOnly", 0.1, 0.0, 0.1, 0.0, 1),
        ];
        let jp = vec![
            row("NoSongs", 0.1, 0.0, 0.1, 0.0, 1),
            row("ZeroShare", 0.1, 0.0, 0.1, 0.0, 1),
            row("Fine", 0.1, 0.0, 0.1, 0.0, 1),
        ];
        let report = ratio_deviations(&cn, &jp, 0.5);
        assert!(report.flagged.is_empty());
        assert_eq!(report.within, 1);
        let names: Vec<&str> = report.undefined.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["CnOnly", "NoSongs", "ZeroShare"]);
        assert_eq!(report.undefined[0].1, UndefinedReason::AbsentInRegion(Region::Jp));
    }

    #[test]
    fn test_single_region_characters_are_undefined() {
        let cn = vec![row("Fine", 0.1, 0.0, 0.1, 0.0, 1), row("CnOnly", 0.3, 0.0, 0.1, 0.0, 1)];
        let jp = vec![row("Fine", 0.1, 0.0, 0.1, 0.0, 1), row("JpOnly", 0.2, 0.0, 0.1, 0.0, 1)];
        let report = ratio_deviations(&cn, &jp, 0.5);
        assert_eq!(report.within, 1);
        assert!(report.flagged.is_empty());
        assert_eq!(
            report.undefined,
            vec![
                ("CnOnly".to_string(), UndefinedReason::AbsentInRegion(Region::Jp)),
                ("JpOnly".to_string(), UndefinedReason::AbsentInRegion(Region::Cn)),
            ]
        );
    }

    #[test]
    fn test_flagged_carries_per_ratio_magnitudes() {
        // char_ratio 0.25, music_ratio 0.5 → deviation 0.5
        let cn = vec![row("X", 0.05, 0.0, 0.05, 0.0, 1)];
        let jp = vec![row("X", 0.2, 0.0, 0.1, 0.0, 1)];
        let report = ratio_deviations(&cn, &jp, 0.4);
        let x = &report.flagged[0];
        assert!((x.char_magnitude - 4.0).abs() < 1e-12);
        assert!((x.music_magnitude - 2.0).abs() < 1e-12);
        assert!((x.magnitude - 2.0).abs() < 1e-12);
    }
}
