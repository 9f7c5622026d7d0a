//! `epirecall-model` – dimensionality reduction and classification.
//!
//! Provides the two learned artifacts consumed by the composite matcher:
//!
//! - [`projection`] – [`InterClassPca`][projection::InterClassPca]: fits a
//!   PCA basis on class-mean-centered residuals and yields an immutable
//!   [`Projection`][projection::Projection] that maps embeddings into a
//!   lower-dimensional space. Two independently parameterised instances are
//!   used per run: one tuned for classification, one for similarity matching.
//! - [`classifier`] – [`SoftmaxClassifier`][classifier::SoftmaxClassifier]:
//!   a multinomial logistic-regression classifier over projected embeddings,
//!   trained per matching invocation via
//!   [`train_classifier`][classifier::train_classifier].
//! - [`eval`] – held-out accuracy and top-k accuracy over a fitted
//!   classifier.
//!
//! All fitted artifacts are immutable; `transform` and `predict_proba` are
//! pure reads and safe to call concurrently from multiple threads.

pub mod classifier;
pub mod eval;
pub mod projection;

pub use classifier::{ClassProbabilities, SoftmaxClassifier, TrainedClassifier, train_classifier};
pub use projection::{InterClassPca, Projection};
