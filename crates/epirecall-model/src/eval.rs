//! Held-out evaluation of a fitted classifier.

use epirecall_types::MatchError;

use crate::classifier::SoftmaxClassifier;

/// Fraction of test samples whose most probable predicted category equals
/// the true category.
///
/// Returns [`MatchError::EmptyQuerySet`] for an empty test set rather than a
/// silent `NaN`.
pub fn accuracy(model: &SoftmaxClassifier, x_test: &[Vec<f64>], y_true: &[String]) -> Result<f64, MatchError> {
    top_k_accuracy(model, x_test, y_true, 1)
}

/// Fraction of test samples whose true category appears within the top `k`
/// predicted categories.
///
/// Categories are ranked by descending probability with a stable sort, so
/// equal probabilities keep their class order; this mirrors the composite
/// matcher's tie-breaking rule. With `k >= number of classes` every sample
/// is trivially a hit.
pub fn top_k_accuracy(
    model: &SoftmaxClassifier,
    x_test: &[Vec<f64>],
    y_true: &[String],
    k: usize,
) -> Result<f64, MatchError> {
    if x_test.is_empty() {
        return Err(MatchError::EmptyQuerySet);
    }
    if x_test.len() != y_true.len() {
        return Err(MatchError::DimensionMismatch {
            expected: x_test.len(),
            actual: y_true.len(),
        });
    }

    let mut hits = 0usize;
    for (features, truth) in x_test.iter().zip(y_true) {
        let probs = model.predict_proba(features)?;
        let classes = model.classes();
        let hit = probs
            .ranked_indices()
            .into_iter()
            .take(k)
            .any(|i| &classes[i] == truth);
        if hit {
            hits += 1;
        }
    }
    Ok(hits as f64 / x_test.len() as f64)
}
