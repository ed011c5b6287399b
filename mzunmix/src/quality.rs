//! Reconstruction fidelity and concordance metrics for a fitted spectrum.
use mzpeaks::Tolerance;
use nalgebra::DVector;

use crate::peaks::{Candidate, ObservedSpectrum};

/// The cosine similarity of two non-negative vectors, clamped to `[0, 1]`.
///
/// Returns 0 when either vector has no magnitude.
pub fn cosine_similarity(reconstructed: &DVector<f64>, observed: &DVector<f64>) -> f64 {
    let a = reconstructed.norm();
    let b = observed.norm();
    if a == 0.0 || b == 0.0 || reconstructed.len() != observed.len() {
        return 0.0;
    }
    (reconstructed.dot(observed) / (a * b)).clamp(0.0, 1.0)
}

/// Each value's fraction of the total, or all zeros when the total is zero
pub fn shares<'a, I: IntoIterator<Item = &'a f64>>(values: I) -> Vec<f64> {
    let values: Vec<f64> = values.into_iter().copied().collect();
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.into_iter().map(|v| v / total).collect()
    } else {
        vec![0.0; values.len()]
    }
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

/// Ranks starting from 1, with tied values sharing the mean of their ranks
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|a, b| values[*a].total_cmp(&values[*b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in &order[i..=j] {
            ranks[*k] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// The Pearson correlation coefficient of two equal-length samples.
///
/// Undefined for fewer than two observations or a constant sample.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 || is_constant(x) || is_constant(y) {
        return None;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (cov, var_x, var_y) = x.iter().zip(y.iter()).fold(
        (0.0, 0.0, 0.0),
        |(cov, var_x, var_y), (a, b)| {
            let da = a - mean_x;
            let db = b - mean_y;
            (cov + da * db, var_x + da * da, var_y + db * db)
        },
    );
    if var_x <= 0.0 || var_y <= 0.0 {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

/// Spearman's rank correlation, the Pearson correlation of average ranks
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 || is_constant(x) || is_constant(y) {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

/// How well coefficient shares agree with the ground-truth shares
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Concordance {
    pub spearman: Option<f64>,
    pub pearson: Option<f64>,
}

impl Concordance {
    pub fn new(shares: &[f64], ground_truth: &[f64]) -> Self {
        Self {
            spearman: spearman(shares, ground_truth),
            pearson: pearson(shares, ground_truth),
        }
    }
}

/// Count the candidate's predicted peaks that have an observed peak within
/// `tolerance`
pub fn count_matched_fragments(
    candidate: &Candidate,
    observed: &ObservedSpectrum,
    tolerance: Tolerance,
) -> u32 {
    let peaks = observed.as_slice();
    candidate
        .spectrum
        .iter()
        .filter(|predicted| {
            let (lo, hi) = tolerance.bounds(predicted.mz);
            let i = peaks.partition_point(|p| p.mz < lo);
            peaks[i..]
                .iter()
                .take_while(|p| p.mz <= hi)
                .any(|p| p.intensity > 0.0)
        })
        .count() as u32
}

/// The fragment-count ground truth for each candidate.
///
/// Externally supplied match counts are used when every candidate has one,
/// otherwise all counts are computed against the observed spectrum so the
/// two sources are never mixed.
pub fn ground_truth_counts(
    candidates: &[Candidate],
    observed: &ObservedSpectrum,
    tolerance: Tolerance,
) -> Vec<u32> {
    let supplied: Option<Vec<u32>> = candidates.iter().map(|c| c.matched_fragments).collect();
    match supplied {
        Some(counts) if !candidates.is_empty() => counts,
        _ => candidates
            .iter()
            .map(|c| count_matched_fragments(c, observed, tolerance))
            .collect(),
    }
}

/// All quality measures of one fit
#[derive(Debug, Clone, PartialEq)]
pub struct QualityMetrics {
    /// The cosine similarity of `Xβ` and `y`
    pub cosine: f64,
    /// `β / Σβ`
    pub shares: Vec<f64>,
    pub ground_truth_shares: Vec<f64>,
    pub concordance: Concordance,
    /// The fraction of observed intensity outside every channel
    pub unassigned_fraction: f64,
    /// The residual sum of squares of the fit
    pub rss: f64,
}

/// Evaluate a fit from its coefficients, reconstruction and observed
/// response together with per-candidate ground-truth counts.
pub fn evaluate_fit(
    beta: &DVector<f64>,
    reconstruction: &DVector<f64>,
    response: &DVector<f64>,
    ground_truth: &[u32],
    unassigned_fraction: f64,
) -> QualityMetrics {
    let cosine = cosine_similarity(reconstruction, response);
    let shares = shares(beta.iter());
    let counts: Vec<f64> = ground_truth.iter().map(|c| *c as f64).collect();
    let ground_truth_shares = self::shares(counts.iter());
    let concordance = Concordance::new(&shares, &ground_truth_shares);
    let rss = if reconstruction.len() == response.len() {
        (response - reconstruction).norm_squared()
    } else {
        response.norm_squared()
    };
    QualityMetrics {
        cosine,
        shares,
        ground_truth_shares,
        concordance,
        unassigned_fraction,
        rss,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peaks::PredictedSpectrum;

    #[test]
    fn test_cosine() {
        let a = DVector::from_vec(vec![1.0, 0.0, 1.0]);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-12);
        let b = DVector::from_vec(vec![0.0, 1.0, 0.0]);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        let z = DVector::zeros(3);
        assert_eq!(cosine_similarity(&a, &z), 0.0);
        assert_eq!(cosine_similarity(&z, &z), 0.0);
    }

    #[test]
    fn test_shares() {
        assert_eq!(shares(&[1.0, 3.0]), vec![0.25, 0.75]);
        assert_eq!(shares(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert!(shares(&Vec::<f64>::new()).is_empty());
    }

    #[test]
    fn test_average_ranks() {
        assert_eq!(average_ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_correlations() {
        let x = [0.1, 0.2, 0.3, 0.4];
        let y = [1.0, 4.0, 9.0, 16.0];
        assert!((spearman(&x, &y).unwrap() - 1.0).abs() < 1e-12);
        assert!(pearson(&x, &y).unwrap() < 1.0);
        let rev = [16.0, 9.0, 4.0, 1.0];
        assert!((spearman(&x, &rev).unwrap() + 1.0).abs() < 1e-12);

        assert_eq!(spearman(&[1.0], &[2.0]), None);
        assert_eq!(pearson(&[1.0, 1.0], &[2.0, 3.0]), None);
        assert_eq!(spearman(&[1.0, 2.0], &[0.0, 0.0]), None);
    }

    #[test]
    fn test_ground_truth_sources() {
        let observed = ObservedSpectrum::from_pairs([(200.0, 5.0), (300.0, 1.0), (400.0, 0.0)]);
        let a = Candidate::new(
            "A",
            PredictedSpectrum::from_pairs([(200.001, 1.0), (300.0, 1.0), (500.0, 1.0)]),
        );
        let b = Candidate::new("B", PredictedSpectrum::from_pairs([(400.0, 1.0)]));
        let tol = Tolerance::PPM(20.0);
        assert_eq!(count_matched_fragments(&a, &observed, tol), 2);
        assert_eq!(count_matched_fragments(&b, &observed, tol), 0);

        let computed = ground_truth_counts(&[a.clone(), b.clone()], &observed, tol);
        assert_eq!(computed, vec![2, 0]);

        let supplied = ground_truth_counts(
            &[a.clone().with_matched_fragments(7), b.clone().with_matched_fragments(3)],
            &observed,
            tol,
        );
        assert_eq!(supplied, vec![7, 3]);

        // Partial supply falls back to computed counts for everyone
        let mixed = ground_truth_counts(&[a.with_matched_fragments(7), b], &observed, tol);
        assert_eq!(mixed, vec![2, 0]);
    }

    #[test]
    fn test_evaluate_fit() {
        let beta = DVector::from_vec(vec![0.75, 0.25]);
        let y = DVector::from_vec(vec![0.5, 0.5]);
        let metrics = evaluate_fit(&beta, &y, &y, &[9, 3], 0.1);
        assert!((metrics.cosine - 1.0).abs() < 1e-12);
        assert_eq!(metrics.shares, vec![0.75, 0.25]);
        assert_eq!(metrics.ground_truth_shares, vec![0.75, 0.25]);
        assert!((metrics.concordance.pearson.unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(metrics.rss, 0.0);
        assert_eq!(metrics.unassigned_fraction, 0.1);
    }
}
