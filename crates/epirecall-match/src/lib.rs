//! `epirecall-match` – composite matching over episodic memory.
//!
//! The top of the retrieval pipeline: blends classifier confidence and
//! cosine similarity into one composite ranking score and returns the top-K
//! memory clips for every query.
//!
//! # Modules
//!
//! - [`matcher`] – the pure ranking algorithm:
//!   [`rank_composite`][matcher::rank_composite] over projected memory
//!   vectors and one query.
//! - [`pipeline`] – [`MatchPipeline`][pipeline::MatchPipeline]: trains the
//!   classifier and the matching projection from a record database, then
//!   processes a query batch with per-query error isolation, collecting a
//!   [`BatchReport`][pipeline::BatchReport].
//! - [`export`] – optional filesystem side effect: copies matched clip media
//!   into per-query directories. Never affects the ranking result.

pub mod export;
pub mod matcher;
pub mod pipeline;

pub use matcher::{MemoryEntry, cosine_similarity, rank_composite};
pub use pipeline::{BatchReport, MatchPipeline, QueryOutcome};
