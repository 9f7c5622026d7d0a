//! End-to-end matching pipeline with per-query error isolation.
//!
//! One [`MatchPipeline::run`] call owns its whole world: it trains a fresh
//! classifier (with its classifier-space projection), fits a fresh
//! matching-space projection, and processes every query against them. No
//! fitted artifact is shared across runs, so independent runs can execute in
//! parallel without coordination.
//!
//! Errors split into two tiers. Degenerate inputs and fit failures
//! (`EmptyDatabase`, `EmptyQuerySet`, `InvalidDimension`, bad configuration)
//! abort the run. Failures while processing a single query, the
//! `UnknownCategory` train/query mismatch above all, are captured in that
//! query's [`QueryOutcome`] and the batch moves on to the next query.

use epirecall_model::{InterClassPca, TrainedClassifier, train_classifier};
use epirecall_types::{ClipRecord, MatchConfig, MatchEntry, MatchError};
use tracing::{debug, info, warn};

use crate::matcher::{MemoryEntry, rank_composite};

/// How many of the query's class probabilities to report at debug level.
const TOP_PROBABILITIES_REPORTED: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Batch report
// ─────────────────────────────────────────────────────────────────────────────

/// The per-query result: either the ranked matches or the error that query
/// failed with.
#[derive(Debug)]
pub struct QueryOutcome {
    pub query_id: String,
    pub query_label: String,
    pub query_category: String,
    pub result: Result<Vec<MatchEntry>, MatchError>,
}

/// Everything one pipeline run produced: one outcome per query (input
/// order) plus the classifier's held-out evaluation metrics, when a genuine
/// train/test split existed.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<QueryOutcome>,
    pub accuracy: Option<f64>,
    pub top_k_accuracy: Option<f64>,
}

impl BatchReport {
    /// Outcomes that produced a ranked match list.
    pub fn succeeded(&self) -> impl Iterator<Item = &QueryOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    /// Outcomes that failed.
    pub fn failed(&self) -> impl Iterator<Item = &QueryOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MatchPipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Composite matching pipeline, parameterised by an explicit [`MatchConfig`].
pub struct MatchPipeline {
    config: MatchConfig,
}

impl MatchPipeline {
    /// Build a pipeline after validating the configuration ranges.
    pub fn new(config: MatchConfig) -> Result<Self, MatchError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Run the full pipeline: train, project, then match every query.
    ///
    /// The returned report has exactly one [`QueryOutcome`] per query, in
    /// query order.
    pub fn run(&self, database: &[ClipRecord], queries: &[ClipRecord]) -> Result<BatchReport, MatchError> {
        if database.is_empty() {
            return Err(MatchError::EmptyDatabase);
        }
        if queries.is_empty() {
            return Err(MatchError::EmptyQuerySet);
        }

        info!(
            database = database.len(),
            queries = queries.len(),
            n_pca_matching = self.config.n_pca_matching,
            n_pca_classifier = self.config.n_pca_classifier,
            lambda_weight = self.config.lambda_weight,
            "starting matching run"
        );

        // Classifier and its own projection, fitted on the full database.
        let trained = train_classifier(
            database,
            self.config.n_pca_classifier,
            self.config.train_split_ratio,
            self.config.accuracy_top_k,
        )?;

        if let Some(path) = &self.config.classifier_dump_path {
            dump_classifier(&trained, path);
        }

        // Independent matching-space projection with its own component count.
        let matching_projection = InterClassPca::fit(database, self.config.n_pca_matching)?;

        // The memory the queries are matched against, optionally narrowed to
        // ids carrying the configured marker (e.g. non-augmented originals).
        let memory_records: Vec<&ClipRecord> = match &self.config.memory_id_filter {
            Some(marker) => database.iter().filter(|r| r.id.contains(marker.as_str())).collect(),
            None => database.iter().collect(),
        };
        if memory_records.is_empty() {
            warn!(filter = ?self.config.memory_id_filter, "memory id filter excluded every record");
            return Err(MatchError::EmptyDatabase);
        }

        let memory: Vec<MemoryEntry> = memory_records
            .iter()
            .map(|record| {
                Ok(MemoryEntry {
                    vector: matching_projection.transform(&record.embedding)?,
                    category: record.category.clone(),
                    id: record.id.clone(),
                })
            })
            .collect::<Result<_, MatchError>>()?;

        let outcomes = queries
            .iter()
            .map(|query| {
                let result = self.match_one(query, &trained, &matching_projection, &memory);
                if let Err(error) = &result {
                    warn!(query_id = %query.id, %error, "query failed; continuing with next query");
                }
                QueryOutcome {
                    query_id: query.id.clone(),
                    query_label: query.label.clone(),
                    query_category: query.category.clone(),
                    result,
                }
            })
            .collect();

        Ok(BatchReport {
            outcomes,
            accuracy: trained.accuracy,
            top_k_accuracy: trained.top_k_accuracy,
        })
    }

    fn match_one(
        &self,
        query: &ClipRecord,
        trained: &TrainedClassifier,
        matching_projection: &epirecall_model::Projection,
        memory: &[MemoryEntry],
    ) -> Result<Vec<MatchEntry>, MatchError> {
        let probabilities = trained.probabilities(&query.embedding)?;
        for (category, probability) in probabilities.top(TOP_PROBABILITIES_REPORTED) {
            debug!(query_id = %query.id, category, probability, "classifier confidence");
        }

        let query_vector = matching_projection.transform(&query.embedding)?;
        rank_composite(
            memory,
            &probabilities,
            &query_vector,
            self.config.n_closest_matches,
            self.config.lambda_weight,
        )
    }
}

/// Serialise the trained classifier to JSON. Failures are reported and
/// swallowed; persistence is a side effect, never part of the algorithm.
fn dump_classifier(trained: &TrainedClassifier, path: &str) {
    match serde_json::to_vec_pretty(trained) {
        Ok(bytes) => match std::fs::write(path, bytes) {
            Ok(()) => info!(path, "dumped trained classifier"),
            Err(error) => warn!(path, %error, "failed to write classifier dump"),
        },
        Err(error) => warn!(path, %error, "failed to serialise classifier"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, category: &str, embedding: Vec<f64>) -> ClipRecord {
        ClipRecord::new(id, format!("label_{id}"), category, embedding)
    }

    /// The four-record database from the matching contract: two categories
    /// along the two axes of a 2-dim embedding space.
    fn four_record_database() -> Vec<ClipRecord> {
        vec![
            record("a1", "A", vec![1.0, 0.0]),
            record("a2", "A", vec![1.0, 0.1]),
            record("b1", "B", vec![0.0, 1.0]),
            record("b2", "B", vec![0.0, 1.1]),
        ]
    }

    fn config_for_two_dims() -> MatchConfig {
        MatchConfig {
            n_pca_matching: 2,
            n_pca_classifier: 0,
            n_closest_matches: 2,
            lambda_weight: 0.5,
            train_split_ratio: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = MatchConfig { lambda_weight: 2.0, ..config_for_two_dims() };
        assert!(matches!(MatchPipeline::new(config), Err(MatchError::InvalidConfig(_))));
    }

    #[test]
    fn empty_database_fails_fast() {
        let pipeline = MatchPipeline::new(config_for_two_dims()).unwrap();
        let queries = vec![record("q", "A", vec![1.0, 0.0])];
        let err = pipeline.run(&[], &queries).unwrap_err();
        assert!(matches!(err, MatchError::EmptyDatabase));
    }

    #[test]
    fn empty_query_set_fails_fast() {
        let pipeline = MatchPipeline::new(config_for_two_dims()).unwrap();
        let err = pipeline.run(&four_record_database(), &[]).unwrap_err();
        assert!(matches!(err, MatchError::EmptyQuerySet));
    }

    #[test]
    fn oversized_matching_components_fail_the_run() {
        let config = MatchConfig { n_pca_matching: 10, ..config_for_two_dims() };
        let pipeline = MatchPipeline::new(config).unwrap();
        let queries = vec![record("q", "A", vec![0.9, 0.2])];
        let err = pipeline.run(&four_record_database(), &queries).unwrap_err();
        assert!(matches!(err, MatchError::InvalidDimension { .. }));
    }

    #[test]
    fn end_to_end_category_a_query_ranks_a_entries_first() {
        let pipeline = MatchPipeline::new(config_for_two_dims()).unwrap();
        let queries = vec![record("q", "A", vec![0.9, 0.2])];

        let report = pipeline.run(&four_record_database(), &queries).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        let matches = report.outcomes[0].result.as_ref().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].category, "A");
        assert_eq!(matches[1].category, "A");
        let mut ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[test]
    fn full_split_run_reports_no_metrics() {
        let pipeline = MatchPipeline::new(config_for_two_dims()).unwrap();
        let queries = vec![record("q", "A", vec![0.9, 0.2])];
        let report = pipeline.run(&four_record_database(), &queries).unwrap();
        assert!(report.accuracy.is_none());
        assert!(report.top_k_accuracy.is_none());
    }

    #[test]
    fn k_larger_than_database_returns_everything() {
        let config = MatchConfig { n_closest_matches: 50, ..config_for_two_dims() };
        let pipeline = MatchPipeline::new(config).unwrap();
        let queries = vec![record("q", "A", vec![0.9, 0.2])];
        let report = pipeline.run(&four_record_database(), &queries).unwrap();
        let matches = report.outcomes[0].result.as_ref().unwrap();
        assert_eq!(matches.len(), 4);
    }

    #[test]
    fn unseen_memory_category_fails_only_that_query() {
        // Classifier trained on categories A and B only; one query is then
        // matched against a memory containing a "C" record. That query must
        // fail with UnknownCategory while the other still succeeds.
        let database = four_record_database();
        let trained = train_classifier(&database, 0, 1.0, 2).unwrap();

        let queries = vec![
            record("q_ok", "A", vec![0.9, 0.2]),
            record("q_bad", "A", vec![0.8, 0.3]),
        ];

        let memory_ok = vec![MemoryEntry {
            vector: vec![1.0, 0.0],
            category: "A".to_string(),
            id: "a1".to_string(),
        }];
        let memory_with_c = vec![MemoryEntry {
            vector: vec![0.0, 1.0],
            category: "C".to_string(),
            id: "c1".to_string(),
        }];

        let mut outcomes = Vec::new();
        for (query, memory) in queries.iter().zip([&memory_ok, &memory_with_c]) {
            let probabilities = trained.probabilities(&query.embedding).unwrap();
            outcomes.push(rank_composite(memory, &probabilities, &query.embedding, 1, 0.5));
        }

        assert!(outcomes[0].is_ok());
        assert_eq!(
            outcomes[1].clone().unwrap_err(),
            MatchError::UnknownCategory("C".to_string())
        );
    }

    #[test]
    fn query_failure_does_not_abort_the_batch() {
        let pipeline = MatchPipeline::new(config_for_two_dims()).unwrap();
        let queries = vec![
            record("q_good", "A", vec![0.9, 0.2]),
            // Wrong dimensionality: this query fails, the batch survives.
            record("q_bad", "A", vec![0.9, 0.2, 0.0]),
            record("q_good_2", "B", vec![0.1, 1.0]),
        ];

        let report = pipeline.run(&four_record_database(), &queries).unwrap();
        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes[0].result.is_ok());
        assert!(report.outcomes[1].result.is_err());
        assert!(report.outcomes[2].result.is_ok());
        assert_eq!(report.succeeded().count(), 2);
        assert_eq!(report.failed().count(), 1);
    }

    #[test]
    fn memory_id_filter_narrows_the_memory() {
        let mut database = four_record_database();
        // Mark a1/b1 as originals; a2/b2 stand in for augmented variants.
        for r in &mut database {
            if r.id == "a1" || r.id == "b1" {
                r.id = format!("{}_9", r.id);
            }
        }
        let config = MatchConfig {
            memory_id_filter: Some("_9".to_string()),
            n_closest_matches: 10,
            ..config_for_two_dims()
        };
        let pipeline = MatchPipeline::new(config).unwrap();
        let queries = vec![record("q", "A", vec![0.9, 0.2])];

        let report = pipeline.run(&database, &queries).unwrap();
        let matches = report.outcomes[0].result.as_ref().unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.id.ends_with("_9")));
    }

    #[test]
    fn filter_excluding_everything_is_fatal() {
        let config = MatchConfig {
            memory_id_filter: Some("no_such_marker".to_string()),
            ..config_for_two_dims()
        };
        let pipeline = MatchPipeline::new(config).unwrap();
        let queries = vec![record("q", "A", vec![0.9, 0.2])];
        let err = pipeline.run(&four_record_database(), &queries).unwrap_err();
        assert!(matches!(err, MatchError::EmptyDatabase));
    }

    #[test]
    fn classifier_dump_is_written_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("classifier.json");
        let config = MatchConfig {
            classifier_dump_path: Some(dump_path.to_string_lossy().into_owned()),
            ..config_for_two_dims()
        };
        let pipeline = MatchPipeline::new(config).unwrap();
        let queries = vec![record("q", "A", vec![0.9, 0.2])];
        pipeline.run(&four_record_database(), &queries).unwrap();
        assert!(dump_path.exists());
    }

    #[test]
    fn unwritable_dump_path_does_not_fail_the_run() {
        let config = MatchConfig {
            classifier_dump_path: Some("/nonexistent-dir/classifier.json".to_string()),
            ..config_for_two_dims()
        };
        let pipeline = MatchPipeline::new(config).unwrap();
        let queries = vec![record("q", "A", vec![0.9, 0.2])];
        assert!(pipeline.run(&four_record_database(), &queries).is_ok());
    }
}
