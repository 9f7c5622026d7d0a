//! Multinomial softmax classifier over (optionally) PCA-reduced embeddings.
//!
//! [`SoftmaxClassifier`] is a plain multinomial logistic regression fitted by
//! full-batch gradient descent; it is retrained from scratch for every
//! matching invocation, so there is no warm-start or persistence requirement.
//! [`train_classifier`] wires the full training contract together: Bernoulli
//! train/test split, optional inter-class PCA, fitting, and held-out
//! accuracy / top-k accuracy evaluation.
//!
//! Class probabilities are exposed through [`ClassProbabilities`], a closed
//! mapping over exactly the categories seen during training; looking up an
//! unseen category is an explicit [`MatchError::UnknownCategory`] outcome
//! rather than a silent default.

use std::collections::BTreeSet;

use epirecall_types::{ClipRecord, MatchError};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::eval;
use crate::projection::{InterClassPca, Projection};

const EPOCHS: usize = 300;
const LEARNING_RATE: f64 = 0.5;
const L2_PENALTY: f64 = 1e-4;

/// Tolerance for the "probabilities sum to one" invariant.
const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

// ─────────────────────────────────────────────────────────────────────────────
// ClassProbabilities
// ─────────────────────────────────────────────────────────────────────────────

/// A probability distribution over the closed set of categories seen during
/// classifier training. Probabilities sum to one within floating tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassProbabilities {
    classes: Vec<String>,
    probabilities: Vec<f64>,
}

impl ClassProbabilities {
    /// Probability of `category`.
    ///
    /// Returns [`MatchError::UnknownCategory`] if the category was absent
    /// from the training label set. Callers must surface this, not swallow
    /// it: it signals a train/query category mismatch.
    pub fn probability(&self, category: &str) -> Result<f64, MatchError> {
        self.classes
            .iter()
            .position(|c| c == category)
            .map(|i| self.probabilities[i])
            .ok_or_else(|| MatchError::UnknownCategory(category.to_string()))
    }

    /// Iterate over `(category, probability)` pairs in class order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.classes
            .iter()
            .map(String::as_str)
            .zip(self.probabilities.iter().copied())
    }

    /// Class indices ranked by descending probability. The sort is stable,
    /// so equal probabilities keep their class order; this is the same
    /// tie-breaking rule the composite matcher uses.
    pub fn ranked_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.probabilities.len()).collect();
        indices.sort_by(|&a, &b| self.probabilities[b].total_cmp(&self.probabilities[a]));
        indices
    }

    /// The `n` most probable `(category, probability)` pairs, best first.
    pub fn top(&self, n: usize) -> Vec<(&str, f64)> {
        self.ranked_indices()
            .into_iter()
            .take(n)
            .map(|i| (self.classes[i].as_str(), self.probabilities[i]))
            .collect()
    }

    /// Number of categories in the distribution.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SoftmaxClassifier
// ─────────────────────────────────────────────────────────────────────────────

/// Multinomial logistic regression, immutable once fitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxClassifier {
    classes: Vec<String>,
    /// `n_features × n_classes` weight matrix.
    weights: DMatrix<f64>,
    /// Per-class bias.
    bias: DVector<f64>,
}

impl SoftmaxClassifier {
    /// Fit on feature rows `x` and category labels `y` by full-batch
    /// gradient descent with a small L2 penalty. Weights start at zero, so
    /// fitting is deterministic for a given input.
    pub fn fit(x: &[Vec<f64>], y: &[String]) -> Result<Self, MatchError> {
        let first = x.first().ok_or(MatchError::EmptyDatabase)?;
        if x.len() != y.len() {
            return Err(MatchError::DimensionMismatch {
                expected: x.len(),
                actual: y.len(),
            });
        }
        let dim = first.len();
        for row in x {
            if row.len() != dim {
                return Err(MatchError::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
        }

        let classes: Vec<String> = y.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let n = x.len();
        let n_classes = classes.len();

        let features = DMatrix::from_fn(n, dim, |i, j| x[i][j]);
        let one_hot = DMatrix::from_fn(n, n_classes, |i, j| {
            if y[i] == classes[j] { 1.0 } else { 0.0 }
        });

        let mut weights = DMatrix::zeros(dim, n_classes);
        let mut bias = DVector::zeros(n_classes);

        for _ in 0..EPOCHS {
            let mut logits = &features * &weights;
            for i in 0..n {
                for j in 0..n_classes {
                    logits[(i, j)] += bias[j];
                }
            }
            softmax_rows_in_place(&mut logits);

            let diff = logits - &one_hot;
            let grad_weights = features.transpose() * &diff / n as f64 + &weights * L2_PENALTY;
            let grad_bias = diff.row_sum().transpose() / n as f64;

            weights -= grad_weights * LEARNING_RATE;
            bias -= grad_bias * LEARNING_RATE;
        }

        debug!(samples = n, features = dim, classes = n_classes, "fitted softmax classifier");

        Ok(Self { classes, weights, bias })
    }

    /// Categories seen during training, in the fixed class order.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Expected feature dimensionality.
    pub fn n_features(&self) -> usize {
        self.weights.nrows()
    }

    /// Class-probability distribution for one feature vector.
    ///
    /// The softmax output is re-checked against the normalisation invariant;
    /// a distribution that does not sum to ~1 is flagged as
    /// [`MatchError::DegenerateDistribution`] instead of being used.
    pub fn predict_proba(&self, features: &[f64]) -> Result<ClassProbabilities, MatchError> {
        if features.len() != self.n_features() {
            return Err(MatchError::DimensionMismatch {
                expected: self.n_features(),
                actual: features.len(),
            });
        }
        let x = DVector::from_column_slice(features);
        let logits = self.weights.transpose() * x + &self.bias;

        let max = logits.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let exps: Vec<f64> = logits.iter().map(|&v| (v - max).exp()).collect();
        let sum: f64 = exps.iter().sum();
        let probabilities: Vec<f64> = exps.iter().map(|&e| e / sum).collect();

        let total: f64 = probabilities.iter().sum();
        if (total - 1.0).abs() > DISTRIBUTION_TOLERANCE {
            return Err(MatchError::DegenerateDistribution { sum: total });
        }

        Ok(ClassProbabilities {
            classes: self.classes.clone(),
            probabilities,
        })
    }

    /// The most probable category for one feature vector.
    pub fn predict(&self, features: &[f64]) -> Result<&str, MatchError> {
        let probs = self.predict_proba(features)?;
        let best = probs.ranked_indices()[0];
        Ok(&self.classes[best])
    }
}

fn softmax_rows_in_place(m: &mut DMatrix<f64>) {
    for i in 0..m.nrows() {
        let max = m.row(i).iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        let mut sum = 0.0;
        for j in 0..m.ncols() {
            let e = (m[(i, j)] - max).exp();
            m[(i, j)] = e;
            sum += e;
        }
        for j in 0..m.ncols() {
            m[(i, j)] /= sum;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Training pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// A fitted classifier together with its classifier-space projection (when
/// PCA was enabled) and held-out evaluation metrics (when a genuine split
/// existed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedClassifier {
    pub classifier: SoftmaxClassifier,
    pub projection: Option<Projection>,
    pub accuracy: Option<f64>,
    pub top_k_accuracy: Option<f64>,
}

impl TrainedClassifier {
    /// Class probabilities for a raw embedding: projects into classifier
    /// space first when a projection was fitted.
    pub fn probabilities(&self, embedding: &[f64]) -> Result<ClassProbabilities, MatchError> {
        match &self.projection {
            Some(projection) => self.classifier.predict_proba(&projection.transform(embedding)?),
            None => self.classifier.predict_proba(embedding),
        }
    }
}

/// Train a classifier on a record database.
///
/// - Records are split into train/test partitions by a Bernoulli draw with
///   success probability `train_split_ratio`. A ratio of `1.0` (or a split
///   that leaves a partition empty) trains on everything and reports no
///   metrics.
/// - When `n_components > 0` an inter-class PCA projection is fitted on the
///   train partition and both partitions are projected through it;
///   `n_components == 0` trains on raw embeddings.
/// - Held-out accuracy and top-`k` accuracy are computed on the test
///   partition when one exists.
pub fn train_classifier(
    records: &[ClipRecord],
    n_components: usize,
    train_split_ratio: f64,
    top_k: usize,
) -> Result<TrainedClassifier, MatchError> {
    if records.is_empty() {
        return Err(MatchError::EmptyDatabase);
    }

    let (train, test) = split_records(records, train_split_ratio);
    let (train, test, evaluate) = if train.is_empty() || test.is_empty() {
        if train_split_ratio < 1.0 {
            warn!(
                ratio = train_split_ratio,
                records = records.len(),
                "split left an empty partition; training on all records without evaluation"
            );
        }
        let all: Vec<&ClipRecord> = records.iter().collect();
        (all.clone(), all, false)
    } else {
        (train, test, train_split_ratio < 1.0)
    };

    let projection = if n_components > 0 {
        let train_owned: Vec<ClipRecord> = train.iter().map(|&r| r.clone()).collect();
        Some(InterClassPca::fit(&train_owned, n_components)?)
    } else {
        None
    };

    let project = |subset: &[&ClipRecord]| -> Result<Vec<Vec<f64>>, MatchError> {
        match &projection {
            Some(p) => subset.iter().map(|r| p.transform(&r.embedding)).collect(),
            None => Ok(subset.iter().map(|r| r.embedding.clone()).collect()),
        }
    };

    let x_train = project(&train)?;
    let y_train: Vec<String> = train.iter().map(|r| r.category.clone()).collect();

    let classifier = SoftmaxClassifier::fit(&x_train, &y_train)?;

    let (accuracy, top_k_accuracy) = if evaluate {
        let x_test = project(&test)?;
        let y_test: Vec<String> = test.iter().map(|r| r.category.clone()).collect();
        let acc = eval::accuracy(&classifier, &x_test, &y_test)?;
        let top_k_acc = eval::top_k_accuracy(&classifier, &x_test, &y_test, top_k)?;
        info!(accuracy = acc, top_k_accuracy = top_k_acc, k = top_k, "classifier evaluation");
        (Some(acc), Some(top_k_acc))
    } else {
        (None, None)
    };

    Ok(TrainedClassifier {
        classifier,
        projection,
        accuracy,
        top_k_accuracy,
    })
}

fn split_records(records: &[ClipRecord], ratio: f64) -> (Vec<&ClipRecord>, Vec<&ClipRecord>) {
    if ratio >= 1.0 {
        let all: Vec<&ClipRecord> = records.iter().collect();
        return (all.clone(), all);
    }
    let mut rng = rand::thread_rng();
    let mut train = Vec::new();
    let mut test = Vec::new();
    for record in records {
        if rng.r#gen::<f64>() < ratio {
            train.push(record);
        } else {
            test.push(record);
        }
    }
    (train, test)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(id: &str, category: &str, embedding: Vec<f64>) -> ClipRecord {
        ClipRecord::new(id, id, category, embedding)
    }

    /// Two well-separated clusters, several samples each.
    fn separable_records() -> Vec<ClipRecord> {
        let mut records = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            records.push(record(&format!("push_{i}"), "push", vec![1.0 + jitter, 0.0, jitter]));
            records.push(record(&format!("pull_{i}"), "pull", vec![0.0, 1.0 + jitter, jitter]));
        }
        records
    }

    // ── SoftmaxClassifier::fit / predict ─────────────────────────────────────

    #[test]
    fn fit_rejects_empty_input() {
        let err = SoftmaxClassifier::fit(&[], &[]).unwrap_err();
        assert!(matches!(err, MatchError::EmptyDatabase));
    }

    #[test]
    fn fit_rejects_label_count_mismatch() {
        let err = SoftmaxClassifier::fit(&[vec![1.0]], &[]).unwrap_err();
        assert!(matches!(err, MatchError::DimensionMismatch { .. }));
    }

    #[test]
    fn classes_are_sorted_and_deduplicated() {
        let x = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let y = vec!["pull".to_string(), "push".to_string(), "pull".to_string()];
        let model = SoftmaxClassifier::fit(&x, &y).unwrap();
        assert_eq!(model.classes(), &["pull".to_string(), "push".to_string()]);
    }

    #[test]
    fn separable_data_is_classified_correctly() {
        let records = separable_records();
        let x: Vec<Vec<f64>> = records.iter().map(|r| r.embedding.clone()).collect();
        let y: Vec<String> = records.iter().map(|r| r.category.clone()).collect();
        let model = SoftmaxClassifier::fit(&x, &y).unwrap();

        assert_eq!(model.predict(&[1.05, 0.0, 0.0]).unwrap(), "push");
        assert_eq!(model.predict(&[0.0, 1.05, 0.0]).unwrap(), "pull");
    }

    #[test]
    fn predict_proba_sums_to_one() {
        let records = separable_records();
        let x: Vec<Vec<f64>> = records.iter().map(|r| r.embedding.clone()).collect();
        let y: Vec<String> = records.iter().map(|r| r.category.clone()).collect();
        let model = SoftmaxClassifier::fit(&x, &y).unwrap();

        let probs = model.predict_proba(&[0.5, 0.5, 0.1]).unwrap();
        let total: f64 = probs.iter().map(|(_, p)| p).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn predict_proba_rejects_wrong_dimension() {
        let x = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let y = vec!["a".to_string(), "b".to_string()];
        let model = SoftmaxClassifier::fit(&x, &y).unwrap();
        let err = model.predict_proba(&[1.0]).unwrap_err();
        assert!(matches!(err, MatchError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn fitting_is_deterministic() {
        let x = vec![vec![1.0, 0.2], vec![0.1, 1.0], vec![0.9, 0.1]];
        let y = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let first = SoftmaxClassifier::fit(&x, &y).unwrap();
        let second = SoftmaxClassifier::fit(&x, &y).unwrap();
        let p1 = first.predict_proba(&[0.5, 0.5]).unwrap();
        let p2 = second.predict_proba(&[0.5, 0.5]).unwrap();
        for ((_, a), (_, b)) in p1.iter().zip(p2.iter()) {
            assert_eq!(a, b);
        }
    }

    // ── ClassProbabilities ───────────────────────────────────────────────────

    #[test]
    fn unknown_category_lookup_fails() {
        let probs = ClassProbabilities {
            classes: vec!["push".to_string(), "pull".to_string()],
            probabilities: vec![0.7, 0.3],
        };
        assert!((probs.probability("push").unwrap() - 0.7).abs() < 1e-12);
        let err = probs.probability("grasp").unwrap_err();
        assert_eq!(err, MatchError::UnknownCategory("grasp".to_string()));
    }

    #[test]
    fn ranked_indices_break_ties_by_class_order() {
        let probs = ClassProbabilities {
            classes: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            probabilities: vec![0.25, 0.5, 0.25],
        };
        // "a" and "c" are tied; the stable sort keeps "a" before "c".
        assert_eq!(probs.ranked_indices(), vec![1, 0, 2]);
    }

    #[test]
    fn top_returns_best_first() {
        let probs = ClassProbabilities {
            classes: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            probabilities: vec![0.2, 0.5, 0.3],
        };
        let top = probs.top(2);
        assert_eq!(top, vec![("b", 0.5), ("c", 0.3)]);
    }

    // ── train_classifier ─────────────────────────────────────────────────────

    #[test]
    fn train_rejects_empty_database() {
        let err = train_classifier(&[], 0, 1.0, 3).unwrap_err();
        assert!(matches!(err, MatchError::EmptyDatabase));
    }

    #[test]
    fn full_split_ratio_reports_no_metrics() {
        let trained = train_classifier(&separable_records(), 0, 1.0, 3).unwrap();
        assert!(trained.accuracy.is_none());
        assert!(trained.top_k_accuracy.is_none());
        assert!(trained.projection.is_none());
    }

    #[test]
    fn zero_components_skips_pca() {
        let trained = train_classifier(&separable_records(), 0, 1.0, 3).unwrap();
        assert!(trained.projection.is_none());
        assert_eq!(trained.classifier.n_features(), 3);
    }

    #[test]
    fn positive_components_fits_projection() {
        let trained = train_classifier(&separable_records(), 2, 1.0, 3).unwrap();
        let projection = trained.projection.as_ref().unwrap();
        assert_eq!(projection.n_components(), 2);
        assert_eq!(trained.classifier.n_features(), 2);
    }

    #[test]
    fn partial_split_reports_metrics_in_unit_interval() {
        let trained = train_classifier(&separable_records(), 0, 0.7, 2).unwrap();
        if let (Some(acc), Some(top_k)) = (trained.accuracy, trained.top_k_accuracy) {
            assert!((0.0..=1.0).contains(&acc));
            assert!((0.0..=1.0).contains(&top_k));
            // With k == number of classes every sample is trivially a hit.
            assert_relative_eq!(top_k, 1.0, epsilon = 1e-12);
        }
        // A degenerate random split reports no metrics; either way the
        // classifier itself must be usable.
        assert!(trained.probabilities(&[1.0, 0.0, 0.0]).is_ok());
    }

    #[test]
    fn probabilities_projects_raw_embeddings() {
        let trained = train_classifier(&separable_records(), 2, 1.0, 3).unwrap();
        let probs = trained.probabilities(&[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(probs.len(), 2);
        let total: f64 = probs.iter().map(|(_, p)| p).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn trained_classifier_serialization_roundtrip() {
        let trained = train_classifier(&separable_records(), 2, 1.0, 3).unwrap();
        let json = serde_json::to_string(&trained).unwrap();
        let back: TrainedClassifier = serde_json::from_str(&json).unwrap();
        let v = [1.0, 0.05, 0.0];
        let p1 = trained.probabilities(&v).unwrap();
        let p2 = back.probabilities(&v).unwrap();
        for ((_, a), (_, b)) in p1.iter().zip(p2.iter()) {
            assert_eq!(a, b);
        }
    }
}
