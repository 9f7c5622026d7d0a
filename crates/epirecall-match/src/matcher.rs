//! Composite score fusion and ranking.
//!
//! For every memory entry the composite score blends the classifier's
//! confidence in the entry's category with the geometric similarity between
//! the entry and the query in matching space:
//!
//! ```text
//! score = (1 − λ) · P(category | query) + λ · cos(entry, query)
//! ```
//!
//! The probability term lives in `[0, 1]` while cosine similarity lives in
//! `[-1, 1]`; the two are blended on these raw scales on purpose, to stay
//! score-compatible with the reference behaviour. Rescaling the cosine term
//! to `[0, 1]` before blending would be a behaviour change, not a fix.

use epirecall_model::ClassProbabilities;
use epirecall_types::{MatchEntry, MatchError};
use tracing::trace;

/// One memory clip projected into matching space.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Matching-space projection of the clip's embedding.
    pub vector: Vec<f64>,
    pub category: String,
    pub id: String,
}

/// Cosine similarity of two equal-length vectors: the normalised dot
/// product, in `[-1.0, 1.0]`. Returns `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Rank the memory against one query by composite score.
///
/// Entries are scored with the blend above, sorted descending, and truncated
/// to `n_closest_matches`. The sort is stable, so entries with equal scores
/// keep their memory order. A memory smaller than `n_closest_matches` is
/// returned in full, not an error.
///
/// # Errors
///
/// - [`MatchError::EmptyDatabase`] if the memory is empty.
/// - [`MatchError::UnknownCategory`] if any entry's category has no
///   probability in `probabilities`; the whole query is aborted so the
///   caller can isolate it and move on to the next query.
/// - [`MatchError::DimensionMismatch`] if an entry's vector length differs
///   from the query's.
pub fn rank_composite(
    memory: &[MemoryEntry],
    probabilities: &ClassProbabilities,
    query: &[f64],
    n_closest_matches: usize,
    lambda_weight: f64,
) -> Result<Vec<MatchEntry>, MatchError> {
    if memory.is_empty() {
        return Err(MatchError::EmptyDatabase);
    }

    let mut scored = Vec::with_capacity(memory.len());
    for entry in memory {
        if entry.vector.len() != query.len() {
            return Err(MatchError::DimensionMismatch {
                expected: query.len(),
                actual: entry.vector.len(),
            });
        }
        let class_prob = probabilities.probability(&entry.category)?;
        let cos_sim = cosine_similarity(&entry.vector, query);
        let score = (1.0 - lambda_weight) * class_prob + lambda_weight * cos_sim;
        trace!(id = %entry.id, category = %entry.category, class_prob, cos_sim, score, "scored entry");
        scored.push(MatchEntry {
            score,
            category: entry.category.clone(),
            id: entry.id.clone(),
        });
    }

    // Stable sort: equal scores keep memory order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(n_closest_matches);
    Ok(scored)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
