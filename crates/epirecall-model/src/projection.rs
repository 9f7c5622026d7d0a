//! Inter-class PCA projection.
//!
//! Standard PCA captures whatever directions carry the most variance, which
//! for clip embeddings is often dominated by differences *within* a category.
//! The inter-class variant first subtracts each record's category mean, then
//! runs PCA on the centered residual matrix, so categories cluster tightly in
//! the reduced space.
//!
//! Fitting produces an immutable [`Projection`] holding the principal
//! directions together with the per-category means and the global mean.
//! Database vectors whose category is known can be centered with their class
//! mean ([`Projection::transform_for_category`]); query vectors, whose
//! category is exactly what is being inferred, are centered with the global
//! mean ([`Projection::transform`]).
//!
//! # Example
//!
//! ```rust
//! use epirecall_model::InterClassPca;
//! use epirecall_types::ClipRecord;
//!
//! let records = vec![
//!     ClipRecord::new("a", "a", "push", vec![1.0, 0.0, 0.1]),
//!     ClipRecord::new("b", "b", "push", vec![1.0, 0.1, 0.0]),
//!     ClipRecord::new("c", "c", "pull", vec![0.0, 1.0, 0.1]),
//!     ClipRecord::new("d", "d", "pull", vec![0.1, 1.0, 0.0]),
//! ];
//! let projection = InterClassPca::fit(&records, 2).unwrap();
//! let reduced = projection.transform(&[0.9, 0.1, 0.05]).unwrap();
//! assert_eq!(reduced.len(), 2);
//! ```

use std::collections::BTreeMap;

use epirecall_types::{ClipRecord, MatchError};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// InterClassPca (fitter)
// ─────────────────────────────────────────────────────────────────────────────

/// Fits a [`Projection`] on a database of records.
///
/// Stateless: every call to [`InterClassPca::fit`] is independent, so two
/// projections with different component counts (classifier space vs matching
/// space) can be fitted from the same records without interference.
pub struct InterClassPca;

impl InterClassPca {
    /// Fit an inter-class PCA basis with `n_components` retained directions.
    ///
    /// # Errors
    ///
    /// - [`MatchError::EmptyDatabase`] if `records` is empty.
    /// - [`MatchError::DimensionMismatch`] if the embeddings do not share one
    ///   dimensionality.
    /// - [`MatchError::InvalidDimension`] if `n_components` is zero or
    ///   exceeds the embedding dimensionality or the record count.
    pub fn fit(records: &[ClipRecord], n_components: usize) -> Result<Projection, MatchError> {
        let first = records.first().ok_or(MatchError::EmptyDatabase)?;
        let dim = first.embedding.len();
        for record in records {
            if record.embedding.len() != dim {
                return Err(MatchError::DimensionMismatch {
                    expected: dim,
                    actual: record.embedding.len(),
                });
            }
        }

        let available = dim.min(records.len());
        if n_components == 0 || n_components > available {
            return Err(MatchError::InvalidDimension {
                requested: n_components,
                available,
            });
        }

        let class_means = per_category_means(records, dim);
        let global_mean = global_mean(records, dim);

        // Residual matrix: each row is the record's embedding minus its own
        // category mean.
        let residuals = DMatrix::from_fn(records.len(), dim, |i, j| {
            records[i].embedding[j] - class_means[&records[i].category][j]
        });

        // Sorted SVD: singular values descend, so the first `n_components`
        // rows of V^T are the top principal directions.
        let svd = residuals.svd(false, true);
        let v_t = svd.v_t.expect("V^T requested from svd");
        let components = v_t.rows(0, n_components).transpose();

        debug!(
            records = records.len(),
            dim,
            n_components,
            categories = class_means.len(),
            "fitted inter-class PCA"
        );

        Ok(Projection {
            components,
            global_mean,
            class_means,
        })
    }
}

fn per_category_means(records: &[ClipRecord], dim: usize) -> BTreeMap<String, DVector<f64>> {
    let mut sums: BTreeMap<String, (DVector<f64>, usize)> = BTreeMap::new();
    for record in records {
        let entry = sums
            .entry(record.category.clone())
            .or_insert_with(|| (DVector::zeros(dim), 0));
        entry.0 += DVector::from_column_slice(&record.embedding);
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(category, (sum, count))| (category, sum / count as f64))
        .collect()
}

fn global_mean(records: &[ClipRecord], dim: usize) -> DVector<f64> {
    let mut sum = DVector::zeros(dim);
    for record in records {
        sum += DVector::from_column_slice(&record.embedding);
    }
    sum / records.len() as f64
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable fitted PCA basis.
///
/// Holds the principal-direction matrix (`input_dim × n_components`, columns
/// orthonormal), the global mean and the per-category means captured at fit
/// time. All transform methods are pure functions over this state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    components: DMatrix<f64>,
    global_mean: DVector<f64>,
    class_means: BTreeMap<String, DVector<f64>>,
}

impl Projection {
    /// Dimensionality of the vectors this projection accepts.
    pub fn input_dim(&self) -> usize {
        self.components.nrows()
    }

    /// Number of retained principal directions.
    pub fn n_components(&self) -> usize {
        self.components.ncols()
    }

    /// Categories whose means were captured at fit time.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.class_means.keys().map(String::as_str)
    }

    /// Project a vector into the reduced space, centering with the global
    /// mean. Use this for query vectors whose category is unknown.
    pub fn transform(&self, vector: &[f64]) -> Result<Vec<f64>, MatchError> {
        self.project(vector, &self.global_mean)
    }

    /// Project a vector whose category is known, centering with that
    /// category's mean.
    ///
    /// Returns [`MatchError::UnknownCategory`] if `category` was not present
    /// at fit time.
    pub fn transform_for_category(&self, vector: &[f64], category: &str) -> Result<Vec<f64>, MatchError> {
        let mean = self
            .class_means
            .get(category)
            .ok_or_else(|| MatchError::UnknownCategory(category.to_string()))?;
        self.project(vector, mean)
    }

    /// Project a batch of vectors with global-mean centering, preserving
    /// input order.
    pub fn transform_batch(&self, vectors: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, MatchError> {
        vectors.iter().map(|v| self.transform(v)).collect()
    }

    /// Re-expand a reduced vector back into the original space.
    ///
    /// The columns of the component matrix are orthonormal, so the transpose
    /// acts as the pseudo-inverse; reconstruction is exact up to the variance
    /// discarded by truncated components.
    pub fn inverse_transform(&self, reduced: &[f64]) -> Result<Vec<f64>, MatchError> {
        if reduced.len() != self.n_components() {
            return Err(MatchError::DimensionMismatch {
                expected: self.n_components(),
                actual: reduced.len(),
            });
        }
        let expanded = &self.components * DVector::from_column_slice(reduced) + &self.global_mean;
        Ok(expanded.iter().copied().collect())
    }

    fn project(&self, vector: &[f64], mean: &DVector<f64>) -> Result<Vec<f64>, MatchError> {
        if vector.len() != self.input_dim() {
            return Err(MatchError::DimensionMismatch {
                expected: self.input_dim(),
                actual: vector.len(),
            });
        }
        let centered = DVector::from_column_slice(vector) - mean;
        let reduced = self.components.transpose() * centered;
        Ok(reduced.iter().copied().collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
