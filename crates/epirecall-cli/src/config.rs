//! Run settings – reads a TOML settings file and `EPIRECALL_*` overrides.

use epirecall_types::MatchConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Optional media-export settings. When present, matched clip media is
/// copied into per-query directories after the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Directory holding one media subdirectory per clip id / query label.
    pub media_base_dir: String,
    /// Root directory the per-run export tree is created under.
    pub target_dir: String,
}

/// Full settings for one `epirecall` invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Matching-pipeline parameters; every field has a default.
    #[serde(default, rename = "match")]
    pub matching: MatchConfig,

    /// Media export, disabled when absent.
    #[serde(default)]
    pub export: Option<ExportSettings>,
}

/// Load settings from a TOML file.
pub fn load_from(path: &Path) -> Result<Settings, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings at {}: {}", path.display(), e))?;
    let mut settings: Settings =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse settings: {}", e))?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Default settings with environment overrides applied (no settings file).
pub fn load_default() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Apply `EPIRECALL_*` environment-variable overrides.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `EPIRECALL_PCA_MATCHING` | `match.n_pca_matching` |
/// | `EPIRECALL_PCA_CLASSIFIER` | `match.n_pca_classifier` |
/// | `EPIRECALL_N_MATCHES` | `match.n_closest_matches` |
/// | `EPIRECALL_LAMBDA` | `match.lambda_weight` |
/// | `EPIRECALL_TRAIN_SPLIT` | `match.train_split_ratio` |
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(v) = std::env::var("EPIRECALL_PCA_MATCHING")
        && let Ok(n) = v.parse::<usize>()
    {
        settings.matching.n_pca_matching = n;
    }
    if let Ok(v) = std::env::var("EPIRECALL_PCA_CLASSIFIER")
        && let Ok(n) = v.parse::<usize>()
    {
        settings.matching.n_pca_classifier = n;
    }
    if let Ok(v) = std::env::var("EPIRECALL_N_MATCHES")
        && let Ok(n) = v.parse::<usize>()
    {
        settings.matching.n_closest_matches = n;
    }
    if let Ok(v) = std::env::var("EPIRECALL_LAMBDA")
        && let Ok(w) = v.parse::<f64>()
    {
        settings.matching.lambda_weight = w;
    }
    if let Ok(v) = std::env::var("EPIRECALL_TRAIN_SPLIT")
        && let Ok(r) = v.parse::<f64>()
    {
        settings.matching.train_split_ratio = r;
    }
}
