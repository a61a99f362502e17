//! Quality metrics: score a candidate image against a reference.
//!
//! Every metric is maximize-oriented. Degenerate inputs (no annotated
//! overlap, zero error) map to finite sentinels. A candidate containing NaN
//! or infinite pixels yields [`MetricError::NonFinite`] instead of a score.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use wf_types::{Image, MetricError, WfResult};

/// Reference annotation values for [`MetricKind::SparseBinaryOverlap`].
pub const ANNOTATION_UNKNOWN: f64 = 0.0;
pub const ANNOTATION_NEGATIVE: f64 = 1.0;
pub const ANNOTATION_POSITIVE: f64 = 2.0;

/// The available fitness functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Jaccard index of a binary result against a sparse
    /// unknown/negative/positive annotation.
    SparseBinaryOverlap,
    /// Mean over reference labels of the best Jaccard index against any
    /// candidate label.
    LabelOverlap,
    /// Reciprocal of the mean squared error.
    InverseMse,
}

impl Default for MetricKind {
    fn default() -> Self {
        Self::LabelOverlap
    }
}

impl MetricKind {
    /// Score `candidate` against `reference`; higher is better.
    pub fn fitness(&self, candidate: &Image, reference: &Image) -> WfResult<f64> {
        if !candidate.same_shape(reference) {
            return Err(MetricError::ShapeMismatch {
                candidate: candidate.shape().to_vec(),
                reference: reference.shape().to_vec(),
            }
            .into());
        }
        if candidate.is_empty() {
            return Err(MetricError::Empty.into());
        }
        let value = match self {
            Self::SparseBinaryOverlap => sparse_binary_overlap(candidate, reference),
            Self::LabelOverlap => mean_best_jaccard(candidate, reference),
            Self::InverseMse => inverse_mse(candidate, reference),
        };
        if !value.is_finite() {
            return Err(MetricError::NonFinite { value }.into());
        }
        Ok(value)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SparseBinaryOverlap => "sparse_binary_overlap",
            Self::LabelOverlap => "label_overlap",
            Self::InverseMse => "inverse_mse",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// TP / (TP + FN + FP) over annotated pixels only; 0 when nothing counts.
fn sparse_binary_overlap(candidate: &Image, reference: &Image) -> f64 {
    let (mut tp, mut fp, mut fn_) = (0u64, 0u64, 0u64);
    for (&c, &r) in candidate.data().iter().zip(reference.data()) {
        let positive_test = c == 1.0;
        let negative_test = c == 0.0;
        if r == ANNOTATION_POSITIVE {
            if positive_test {
                tp += 1;
            } else if negative_test {
                fn_ += 1;
            }
        } else if r == ANNOTATION_NEGATIVE && positive_test {
            fp += 1;
        }
    }
    let denominator = tp + fn_ + fp;
    if denominator == 0 {
        0.0
    } else {
        tp as f64 / denominator as f64
    }
}

fn label_of(v: f64) -> i64 {
    v.round() as i64
}

/// Mean over reference labels of the best Jaccard index against any
/// candidate label.
fn mean_best_jaccard(candidate: &Image, reference: &Image) -> f64 {
    let mut overlap: HashMap<(i64, i64), u64> = HashMap::new();
    let mut reference_sizes: BTreeMap<i64, u64> = BTreeMap::new();
    let mut candidate_sizes: HashMap<i64, u64> = HashMap::new();

    for (&c, &r) in candidate.data().iter().zip(reference.data()) {
        let (c, r) = (label_of(c), label_of(r));
        *overlap.entry((r, c)).or_default() += 1;
        *reference_sizes.entry(r).or_default() += 1;
        *candidate_sizes.entry(c).or_default() += 1;
    }

    let mut best: BTreeMap<i64, f64> = reference_sizes.keys().map(|r| (*r, 0.0)).collect();
    for (&(r, c), &intersection) in &overlap {
        let union = reference_sizes[&r] + candidate_sizes[&c] - intersection;
        if union == 0 {
            continue;
        }
        let jaccard = intersection as f64 / union as f64;
        if let Some(entry) = best.get_mut(&r) {
            *entry = entry.max(jaccard);
        }
    }

    if best.is_empty() {
        return 0.0;
    }
    best.values().sum::<f64>() / best.len() as f64
}

/// `1 / mse`, or `1 / f64::MIN_POSITIVE` when the error vanishes. NaN
/// pixels propagate.
fn inverse_mse(candidate: &Image, reference: &Image) -> f64 {
    let sum: f64 = candidate
        .data()
        .iter()
        .zip(reference.data())
        .map(|(c, r)| (c - r) * (c - r))
        .sum();
    let mse = sum / candidate.len() as f64;
    if mse < f64::MIN_POSITIVE {
        1.0 / f64::MIN_POSITIVE
    } else {
        1.0 / mse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use wf_types::WfError;

    fn img<const W: usize>(rows: &[[f64; W]]) -> Image {
        Image::from_rows(rows).unwrap()
    }

    #[test]
    fn sparse_binary_perfect_overlap() {
        let reference = img(&[[1.0, 1.0], [2.0, 2.0]]);
        let candidate = img(&[[0.0, 0.0], [1.0, 1.0]]);
        let q = MetricKind::SparseBinaryOverlap.fitness(&candidate, &reference).unwrap();
        assert_eq!(q, 1.0);
    }

    #[test]
    fn sparse_binary_ignores_unknown_pixels() {
        let reference = img(&[[0.0, 0.0, 1.0, 2.0]]);
        let candidate = img(&[[1.0, 0.0, 1.0, 1.0]]);
        // tp = 1 (last), fp = 1 (third), unknown pixels ignored
        let q = MetricKind::SparseBinaryOverlap.fitness(&candidate, &reference).unwrap();
        assert!((q - 0.5).abs() < 1e-12);
    }

    #[test]
    fn sparse_binary_without_annotation_is_zero() {
        let reference = img(&[[0.0, 0.0], [1.0, 1.0]]);
        let candidate = img(&[[1.0, 1.0], [0.0, 0.0]]);
        let q = MetricKind::SparseBinaryOverlap.fitness(&candidate, &reference).unwrap();
        assert_eq!(q, 0.0);
    }

    #[test]
    fn label_overlap_identical_maps_score_one() {
        let labels = img(&[[0.0, 1.0, 1.0], [2.0, 2.0, 0.0]]);
        let q = MetricKind::LabelOverlap.fitness(&labels, &labels).unwrap();
        assert!((q - 1.0).abs() < 1e-12);
    }

    #[test]
    fn label_overlap_is_invariant_to_relabeling() {
        let reference = img(&[[0.0, 1.0, 1.0], [2.0, 2.0, 0.0]]);
        let candidate = img(&[[0.0, 7.0, 7.0], [3.0, 3.0, 0.0]]);
        let q = MetricKind::LabelOverlap.fitness(&candidate, &reference).unwrap();
        assert!((q - 1.0).abs() < 1e-12);
    }

    #[test]
    fn label_overlap_partial_match() {
        // reference label 1 covers 2 pixels, candidate covers 1 of them
        let reference = img(&[[1.0, 1.0, 0.0, 0.0]]);
        let candidate = img(&[[1.0, 0.0, 0.0, 0.0]]);
        // background: |{1,2,3} ∩ {2,3}| / |{1,2,3} ∪ {2,3}| = 2/3; label 1: 1/2
        let q = MetricKind::LabelOverlap.fitness(&candidate, &reference).unwrap();
        assert!((q - (2.0 / 3.0 + 0.5) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn label_overlap_stays_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let reference = Image::from_fn(8, 8, |_, _| rng.random_range(0..4) as f64);
            let candidate = Image::from_fn(8, 8, |_, _| rng.random_range(0..5) as f64);
            let q = MetricKind::LabelOverlap.fitness(&candidate, &reference).unwrap();
            assert!((0.0..=1.0).contains(&q), "out of range: {q}");
        }
    }

    #[test]
    fn inverse_mse_identical_images_is_large_and_finite() {
        let a = img(&[[1.0, 2.0], [3.0, 4.0]]);
        let q = MetricKind::InverseMse.fitness(&a, &a).unwrap();
        assert!(q.is_finite());
        assert!(q > 1e300);
    }

    #[test]
    fn inverse_mse_matches_definition() {
        let a = img(&[[1.0, 2.0], [3.0, 4.0]]);
        let b = img(&[[1.0, 2.0], [3.0, 6.0]]);
        let q = MetricKind::InverseMse.fitness(&a, &b).unwrap();
        assert!((q - 1.0).abs() < 1e-12);
    }

    #[test]
    fn inverse_mse_of_nan_candidate_is_an_error() {
        let reference = img(&[[1.0, 2.0], [3.0, 4.0]]);
        let candidate = img(&[[1.0, f64::NAN], [3.0, 4.0]]);
        let err = MetricKind::InverseMse.fitness(&candidate, &reference).unwrap_err();
        assert!(matches!(err, WfError::Metric(MetricError::NonFinite { value }) if value.is_nan()));
    }

    #[test]
    fn overlap_metrics_stay_finite_on_nan_pixels() {
        let reference = img(&[[1.0, 2.0], [2.0, 0.0]]);
        let candidate = img(&[[f64::NAN, 1.0], [f64::NAN, 0.0]]);
        for metric in [MetricKind::SparseBinaryOverlap, MetricKind::LabelOverlap] {
            let q = metric.fitness(&candidate, &reference).unwrap();
            assert!(q.is_finite(), "{metric}: {q}");
        }
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let a = img(&[[1.0, 2.0]]);
        let b = img(&[[1.0], [2.0]]);
        for metric in [
            MetricKind::SparseBinaryOverlap,
            MetricKind::LabelOverlap,
            MetricKind::InverseMse,
        ] {
            assert!(matches!(
                metric.fitness(&a, &b),
                Err(WfError::Metric(MetricError::ShapeMismatch { .. }))
            ));
        }
    }

    #[test]
    fn metric_kind_serializes_snake_case() {
        let json = serde_json::to_string(&MetricKind::InverseMse).unwrap();
        assert_eq!(json, "\"inverse_mse\"");
        let back: MetricKind = serde_json::from_str("\"sparse_binary_overlap\"").unwrap();
        assert_eq!(back, MetricKind::SparseBinaryOverlap);
        assert_eq!(MetricKind::LabelOverlap.to_string(), "label_overlap");
    }
}
