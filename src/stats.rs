//! Pure statistics: vote-share standardization, rank correlation, ratios.
//!
//! Nothing here returns NaN or infinity to a caller. Degenerate inputs come
//! back as a [`StatsError`] or as an explicit outcome variant.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

use crate::region::Region;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("session total is zero")]
    ZeroTotal,
    #[error("population of {0} is too small to standardize (need at least 2)")]
    InsufficientPopulation(usize),
    #[error("all vote shares are identical; standard deviation is zero")]
    ZeroVariance,
}

pub type Result<T> = std::result::Result<T, StatsError>;

/// Vote share and z-score for one entity within its (region, session) population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standardized {
    pub name: String,
    pub votes: i64,
    pub share: f64,
    pub z: f64,
}

/// Standardize vote counts against the raw-table session total.
///
/// `share = votes / total`, `z = (share - mean) / std` with the population
/// standard deviation. The population is never pooled across sessions.
pub fn standardize(entities: &[(String, i64)], total_votes: i64) -> Result<Vec<Standardized>> {
    if total_votes <= 0 {
        return Err(StatsError::ZeroTotal);
    }
    if entities.len() < 2 {
        return Err(StatsError::InsufficientPopulation(entities.len()));
    }

    let total = total_votes as f64;
    let shares: Vec<f64> = entities.iter().map(|(_, v)| *v as f64 / total).collect();
    let (mean, std) = mean_std(&shares);
    if std <= f64::EPSILON * mean.abs().max(1.0) {
        return Err(StatsError::ZeroVariance);
    }

    Ok(entities
        .iter()
        .zip(&shares)
        .map(|((name, votes), &share)| Standardized {
            name: name.clone(),
            votes: *votes,
            share,
            z: (share - mean) / std,
        })
        .collect())
}

/// Mean and population standard deviation. Empty input gives (0, 0).
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Outcome of a rank correlation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Correlation {
    Rho { rho: f64, p_value: f64, n: usize },
    /// Fewer than two complete pairs.
    Insufficient { n: usize },
    /// One side is constant, so ranks carry no information.
    Degenerate { n: usize },
}

impl Correlation {
    pub fn is_significant(&self, alpha: f64) -> bool {
        matches!(self, Correlation::Rho { p_value, .. } if *p_value < alpha)
    }
}

/// Spearman rank correlation over pairwise-complete observations.
///
/// Pairs where either side is missing (or non-finite) are dropped first.
/// Ties get average ranks; rho is the Pearson correlation of the ranks.
pub fn spearman(pairs: &[(Option<f64>, Option<f64>)]) -> Correlation {
    let (xs, ys): (Vec<f64>, Vec<f64>) = pairs
        .iter()
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .unzip();

    let n = xs.len();
    if n < 2 {
        return Correlation::Insufficient { n };
    }

    let rx = average_ranks(&xs);
    let ry = average_ranks(&ys);
    let rho = match pearson(&rx, &ry) {
        Some(r) => r.clamp(-1.0, 1.0),
        None => return Correlation::Degenerate { n },
    };

    Correlation::Rho {
        rho,
        p_value: correlation_p_value(rho, n),
        n,
    }
}

/// 1-based ranks with ties sharing the mean of their positions.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j (0-based) → ranks i+1..=j+1
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx * vy).sqrt())
}

/// Two-sided p-value for a correlation coefficient via Student's t with
/// `n - 2` degrees of freedom.
fn correlation_p_value(rho: f64, n: usize) -> f64 {
    if n <= 2 {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let denom = 1.0 - rho * rho;
    if denom <= 0.0 {
        return 0.0;
    }
    let t = rho * (df / denom).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Why a ratio could not be formed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedReason {
    MissingValue(String),
    ZeroDenominator(String),
    ZeroNumerator(String),
    /// The entity has no row in this region.
    AbsentInRegion(Region),
}

impl std::fmt::Display for UndefinedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingValue(what) => write!(f, "missing {what}"),
            Self::ZeroDenominator(what) => write!(f, "zero {what} (denominator)"),
            Self::ZeroNumerator(what) => write!(f, "zero {what} (numerator)"),
            Self::AbsentInRegion(region) => write!(f, "not polled in {region}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum RatioOutcome {
    Defined(f64),
    Undefined(UndefinedReason),
}

impl RatioOutcome {
    /// A strictly positive ratio `num / den`. Zero on either side is
    /// undefined: a zero numerator would make the reciprocal infinite.
    pub fn positive(num: Option<f64>, den: Option<f64>, label: &str) -> Self {
        let (num, den) = match (num, den) {
            (Some(n), Some(d)) => (n, d),
            _ => return Self::Undefined(UndefinedReason::MissingValue(label.to_string())),
        };
        if den == 0.0 {
            return Self::Undefined(UndefinedReason::ZeroDenominator(label.to_string()));
        }
        if num == 0.0 {
            return Self::Undefined(UndefinedReason::ZeroNumerator(label.to_string()));
        }
        Self::Defined(num / den)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Defined(v) => Some(*v),
            Self::Undefined(_) => None,
        }
    }
}

/// Symmetric deviation magnitude: 2.0 and 0.5 both read as 2.0.
pub fn deviation_magnitude(ratio: f64) -> f64 {
    if ratio >= 1.0 { ratio } else { 1.0 / ratio }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(votes: &[i64]) -> Vec<(String, i64)> {
        votes.iter().enumerate().map(|(i, v)| (format!("c{i}"), *v)).collect()
    }

    #[test]
    fn test_standardize_known_values() {
        let out = standardize(&named(&[100, 200, 300, 400]), 1000).unwrap();
        let shares: Vec<f64> = out.iter().map(|s| s.share).collect();
        assert_eq!(shares, vec![0.1, 0.2, 0.3, 0.4]);

        let (mean, std) = mean_std(&shares);
        assert!((mean - 0.25).abs() < 1e-12);
        assert!((std - 0.1118).abs() < 1e-4);

        let expected = [-1.3416, -0.4472, 0.4472, 1.3416];
        for (s, e) in out.iter().zip(expected) {
            assert!((s.z - e).abs() < 1e-4, "z={} expected {}", s.z, e);
        }

        let zs: Vec<f64> = out.iter().map(|s| s.z).collect();
        let (zm, zs_std) = mean_std(&zs);
        assert!(zm.abs() < 1e-9);
        assert!((zs_std - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_standardize_errors() {
        assert_eq!(standardize(&named(&[1, 2]), 0), Err(StatsError::ZeroTotal));
        assert_eq!(
            standardize(&named(&[5]), 10),
            Err(StatsError::InsufficientPopulation(1))
        );
        assert_eq!(standardize(&named(&[5, 5, 5]), 30), Err(StatsError::ZeroVariance));
    }

    #[test]
    fn test_standardize_is_deterministic() {
        let input = named(&[13, 7, 29, 51]);
        assert_eq!(standardize(&input, 100), standardize(&input, 100));
    }

    #[test]
    fn test_average_ranks_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_spearman_perfect() {
        let pairs: Vec<_> = (0..10).map(|i| (Some(i as f64), Some((i * i) as f64))).collect();
        match spearman(&pairs) {
            Correlation::Rho { rho, p_value, n } => {
                assert!((rho - 1.0).abs() < 1e-12);
                assert_eq!(n, 10);
                assert!(p_value < 1e-6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_spearman_drops_incomplete_pairs() {
        let pairs = vec![
            (Some(1.0), Some(3.0)),
            (None, Some(2.0)),
            (Some(2.0), None),
            (Some(3.0), Some(1.0)),
        ];
        match spearman(&pairs) {
            Correlation::Rho { rho, n, .. } => {
                assert_eq!(n, 2);
                assert!((rho + 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_spearman_insufficient_and_degenerate() {
        assert_eq!(spearman(&[(Some(1.0), Some(2.0))]), Correlation::Insufficient { n: 1 });
        assert_eq!(spearman(&[]), Correlation::Insufficient { n: 0 });
        let flat = vec![(Some(1.0), Some(5.0)), (Some(2.0), Some(5.0)), (Some(3.0), Some(5.0))];
        assert_eq!(spearman(&flat), Correlation::Degenerate { n: 3 });
    }

    #[test]
    fn test_p_value_against_reference() {
        // rho = 0.5, n = 20 → t ≈ 2.449, df = 18, two-sided p ≈ 0.0248
        let p = correlation_p_value(0.5, 20);
        assert!((p - 0.0248).abs() < 5e-4, "p={p}");
        assert!((correlation_p_value(0.0, 20) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_outcome() {
        assert_eq!(RatioOutcome::positive(Some(2.0), Some(1.0), "x"), RatioOutcome::Defined(2.0));
        assert!(matches!(
            RatioOutcome::positive(Some(1.0), Some(0.0), "x"),
            RatioOutcome::Undefined(UndefinedReason::ZeroDenominator(_))
        ));
        assert!(matches!(
            RatioOutcome::positive(Some(0.0), Some(1.0), "x"),
            RatioOutcome::Undefined(UndefinedReason::ZeroNumerator(_))
        ));
        assert!(matches!(
            RatioOutcome::positive(None, Some(1.0), "x"),
            RatioOutcome::Undefined(UndefinedReason::MissingValue(_))
        ));
    }

    #[test]
    fn test_deviation_magnitude_symmetric() {
        assert_eq!(deviation_magnitude(2.0), 2.0);
        assert_eq!(deviation_magnitude(0.5), 2.0);
        assert_eq!(deviation_magnitude(1.0), 1.0);
    }
}
