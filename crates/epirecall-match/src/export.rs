//! Filesystem export of match results.
//!
//! Copies the media directories of matched clips into a per-query layout so
//! a human can eyeball what the memory recalled:
//!
//! ```text
//! <target>/<query_label>/query_<label>: <category>/   (the query's own media)
//! <target>/<query_label>/match_<rank>:<id>_<score>_<category>/
//! ```
//!
//! where `<score>` carries four decimal places and `<rank>` counts from zero.
//!
//! Everything here is a side effect outside the ranking algorithm: missing
//! source media, already-existing directories and copy failures are logged
//! and skipped, never turned into pipeline errors.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use epirecall_types::{MatchConfig, MatchEntry};
use tracing::{debug, warn};

use crate::pipeline::{BatchReport, QueryOutcome};

/// Copies matched clip media from a base directory (one subdirectory per
/// clip id / query label) into per-query result directories.
pub struct MatchExporter {
    base_dir: PathBuf,
    target_dir: PathBuf,
}

impl MatchExporter {
    pub fn new(base_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            target_dir: target_dir.into(),
        }
    }

    /// Conventional run-directory name encoding the projection sizes and the
    /// blend weight, e.g. `matching_pca_20_classifier_50_0.50`.
    pub fn run_dir_name(config: &MatchConfig) -> String {
        format!(
            "matching_pca_{}_classifier_{}_{:.2}",
            config.n_pca_matching, config.n_pca_classifier, config.lambda_weight
        )
    }

    /// Export every successful outcome of `report`. Returns how many match
    /// directories were created.
    pub fn export(&self, report: &BatchReport) -> usize {
        report
            .succeeded()
            .map(|outcome| self.export_query(outcome))
            .sum()
    }

    /// Export one query's matches. Failures are logged and skipped.
    pub fn export_query(&self, outcome: &QueryOutcome) -> usize {
        let Ok(matches) = &outcome.result else {
            return 0;
        };

        let label_dir = self.target_dir.join(&outcome.query_label);
        if let Err(error) = fs::create_dir_all(&label_dir) {
            warn!(dir = %label_dir.display(), %error, "could not create query directory");
            return 0;
        }

        // The query's own media, for side-by-side comparison.
        let query_src = self.base_dir.join(&outcome.query_label);
        let query_dst = label_dir.join(format!(
            "query_{}: {}",
            outcome.query_label, outcome.query_category
        ));
        if let Err(error) = copy_dir_recursive(&query_src, &query_dst) {
            debug!(src = %query_src.display(), %error, "query media not copied");
        }

        let mut exported = 0;
        for (rank, entry) in matches.iter().enumerate() {
            let src = self.base_dir.join(&entry.id);
            let dst = label_dir.join(match_dir_name(rank, entry));
            match copy_dir_recursive(&src, &dst) {
                Ok(()) => exported += 1,
                Err(error) => {
                    warn!(src = %src.display(), dst = %dst.display(), %error, "match media not copied");
                }
            }
        }
        exported
    }
}

fn match_dir_name(rank: usize, entry: &MatchEntry) -> String {
    format!("match_{}:{}_{:.4}_{}", rank, entry.id, entry.score, entry.category)
}

/// Copy a directory tree. An already-existing destination is fine; files are
/// overwritten.
fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
