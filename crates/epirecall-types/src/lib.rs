//! `epirecall-types` – shared data model for the episodic recall engine.
//!
//! Defines the record type flowing through every pipeline stage
//! ([`ClipRecord`]), the ranked output entry ([`MatchEntry`]), the explicit
//! configuration surface ([`MatchConfig`]) and the cross-crate error taxonomy
//! ([`MatchError`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One clip in the episodic memory: an opaque identifier, a fine-grained
/// label used to describe matches, a coarse category shared by many clips,
/// and the fixed-length embedding vector produced by the upstream model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipRecord {
    /// Unique opaque identifier (e.g. `"10423_9"`).
    pub id: String,
    /// Fine-grained label reported alongside matches.
    pub label: String,
    /// Coarse class used for classification and inter-class centering.
    pub category: String,
    /// Dense embedding vector; dimensionality is uniform within one dataset.
    pub embedding: Vec<f64>,
}

impl ClipRecord {
    pub fn new(id: impl Into<String>, label: impl Into<String>, category: impl Into<String>, embedding: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            category: category.into(),
            embedding,
        }
    }
}

/// One entry of a ranked match result: composite score, the matched clip's
/// category and its identifier. Produced in descending score order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEntry {
    pub score: f64,
    pub category: String,
    pub id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Explicit per-run configuration for the matching pipeline.
///
/// There is deliberately no process-wide configuration singleton; a value of
/// this struct is handed to each pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Component count of the matching-space projection (must be > 0).
    #[serde(default = "default_n_pca_matching")]
    pub n_pca_matching: usize,

    /// Component count of the classifier-space projection; `0` disables PCA
    /// before classification and trains on raw embeddings.
    #[serde(default = "default_n_pca_classifier")]
    pub n_pca_classifier: usize,

    /// How many matches to return per query (must be > 0).
    #[serde(default = "default_n_closest_matches")]
    pub n_closest_matches: usize,

    /// Blend weight in `[0, 1]`: `0` ranks purely by classifier confidence,
    /// `1` purely by cosine similarity.
    #[serde(default = "default_lambda_weight")]
    pub lambda_weight: f64,

    /// Fraction of the database used for classifier training, in `(0, 1]`.
    /// `1.0` trains on everything and skips held-out evaluation.
    #[serde(default = "default_train_split_ratio")]
    pub train_split_ratio: f64,

    /// `k` used for the held-out top-k accuracy report.
    #[serde(default = "default_accuracy_top_k")]
    pub accuracy_top_k: usize,

    /// When set, only database records whose id contains this substring take
    /// part in matching (used to exclude augmented clips from the memory).
    #[serde(default)]
    pub memory_id_filter: Option<String>,

    /// When set, the trained classifier and its projection are serialised to
    /// this path as JSON after training. Failures are reported, not fatal.
    #[serde(default)]
    pub classifier_dump_path: Option<String>,
}

fn default_n_pca_matching() -> usize {
    20
}
fn default_n_pca_classifier() -> usize {
    50
}
fn default_n_closest_matches() -> usize {
    5
}
fn default_lambda_weight() -> f64 {
    0.5
}
fn default_train_split_ratio() -> f64 {
    0.8
}
fn default_accuracy_top_k() -> usize {
    3
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            n_pca_matching: default_n_pca_matching(),
            n_pca_classifier: default_n_pca_classifier(),
            n_closest_matches: default_n_closest_matches(),
            lambda_weight: default_lambda_weight(),
            train_split_ratio: default_train_split_ratio(),
            accuracy_top_k: default_accuracy_top_k(),
            memory_id_filter: None,
            classifier_dump_path: None,
        }
    }
}

impl MatchConfig {
    /// Check value ranges before a run. Component counts are checked against
    /// the data later, at fit time, where the dimensionality is known.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.n_pca_matching == 0 {
            return Err(MatchError::InvalidConfig("n_pca_matching must be > 0".to_string()));
        }
        if self.n_closest_matches == 0 {
            return Err(MatchError::InvalidConfig("n_closest_matches must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.lambda_weight) {
            return Err(MatchError::InvalidConfig(format!(
                "lambda_weight must be in [0, 1], got {}",
                self.lambda_weight
            )));
        }
        if !(self.train_split_ratio > 0.0 && self.train_split_ratio <= 1.0) {
            return Err(MatchError::InvalidConfig(format!(
                "train_split_ratio must be in (0, 1], got {}",
                self.train_split_ratio
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error taxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Errors produced by the projection, classifier and matching stages.
///
/// `InvalidDimension`, `EmptyDatabase`, `EmptyQuerySet` and `InvalidConfig`
/// are fatal to the whole run. `UnknownCategory` is isolated to the query it
/// occurred on; the batch continues with the next query.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchError {
    #[error("Requested {requested} components but only {available} are available")]
    InvalidDimension { requested: usize, available: usize },

    #[error("Category {0:?} was not seen during classifier training")]
    UnknownCategory(String),

    #[error("The match database contains no records")]
    EmptyDatabase,

    #[error("The query set contains no records")]
    EmptyQuerySet,

    #[error("Classifier produced a non-normalised distribution (sum = {sum})")]
    DegenerateDistribution { sum: f64 },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
