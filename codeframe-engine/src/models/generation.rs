//! Generation lifecycle
//!
//! A generation is one taxonomy-building run for a category:
//! PROCESSING → COMPLETED → APPLIED, or PROCESSING → FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::MeceIssue;

/// Generation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    /// Cluster jobs outstanding
    Processing,
    /// Every cluster job reached a terminal state
    Completed,
    /// Codeframe assigned onto the answer corpus
    Applied,
    /// Start aborted or cancelled
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Applied => "applied",
            GenerationStatus::Failed => "failed",
        }
    }

    /// Hierarchy is final enough to apply
    pub fn is_applicable(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Applied)
    }
}

impl FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(GenerationStatus::Processing),
            "completed" => Ok(GenerationStatus::Completed),
            "applied" => Ok(GenerationStatus::Applied),
            "failed" => Ok(GenerationStatus::Failed),
            other => Err(format!("Unknown generation status: {}", other)),
        }
    }
}

/// Coding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodingMode {
    /// Brand extraction over the whole corpus (clustering skipped)
    Brand,
    /// General open-ended coding via semantic clusters
    #[default]
    OpenEnded,
}

/// How deep the proposal collaborator should build the taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyPreference {
    Flat,
    TwoLevel,
    #[default]
    Adaptive,
}

/// Clustering collaborator parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringParameters {
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_min_cluster_size() -> usize {
    5
}

fn default_min_samples() -> usize {
    3
}

impl Default for ClusteringParameters {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            min_samples: default_min_samples(),
        }
    }
}

/// Generation configuration (snapshotted into every cluster job)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub coding_mode: CodingMode,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default)]
    pub hierarchy_preference: HierarchyPreference,
    /// Codes already in use for the category, to merge against
    #[serde(default)]
    pub existing_codes: Vec<String>,
    #[serde(default)]
    pub clustering: ClusteringParameters,
    /// Embedding model override (engine default when None)
    #[serde(default)]
    pub embedding_model: Option<String>,
}

fn default_target_language() -> String {
    "en".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            coding_mode: CodingMode::default(),
            target_language: default_target_language(),
            hierarchy_preference: HierarchyPreference::default(),
            existing_codes: Vec::new(),
            clustering: ClusteringParameters::default(),
            embedding_model: None,
        }
    }
}

impl GenerationConfig {
    /// Reject parameter combinations the clustering step cannot honour
    pub fn validate(&self) -> Result<(), String> {
        if self.clustering.min_cluster_size < 2 {
            return Err(format!(
                "min_cluster_size must be at least 2 (got {})",
                self.clustering.min_cluster_size
            ));
        }
        if self.clustering.min_samples < 1 {
            return Err("min_samples must be at least 1".to_string());
        }
        if self.target_language.trim().is_empty() {
            return Err("target_language must not be empty".to_string());
        }
        Ok(())
    }
}

/// Persisted generation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub id: Uuid,
    pub category_id: i64,
    pub n_answers: usize,
    pub n_clusters: usize,
    /// Answers the clustering step could not place
    pub noise_count: usize,
    pub status: GenerationStatus,
    pub config: GenerationConfig,
    /// Embedding model used for answers and nodes
    pub embedding_model: String,
    pub mece_score: Option<f64>,
    pub mece_issues: Vec<MeceIssue>,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl Generation {
    /// Create new generation in PROCESSING state
    pub fn new(
        category_id: i64,
        n_answers: usize,
        n_clusters: usize,
        noise_count: usize,
        config: GenerationConfig,
        embedding_model: String,
        created_by: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category_id,
            n_answers,
            n_clusters,
            noise_count,
            status: GenerationStatus::Processing,
            config,
            embedding_model,
            mece_score: None,
            mece_issues: Vec::new(),
            processing_time_ms: None,
            error_message: None,
            created_by,
            created_at: Utc::now(),
            completed_at: None,
            applied_at: None,
        }
    }

    pub fn status_url(&self) -> String {
        format!("/api/codeframe/{}/status", self.id)
    }
}

/// Returned by start: the caller polls `status_url`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationHandle {
    pub generation_id: Uuid,
    pub status: GenerationStatus,
    pub n_clusters: usize,
    pub n_answers: usize,
    pub noise_count: usize,
    pub estimated_time_seconds: u64,
    pub status_url: String,
}

/// Poll response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStatusReport {
    pub generation_id: Uuid,
    pub category_id: i64,
    pub status: GenerationStatus,
    /// Percentage complete (0.0 - 100.0)
    pub progress: f64,
    pub n_clusters: usize,
    pub n_completed: usize,
    pub n_failed: usize,
    pub n_pending: usize,
    pub n_themes: usize,
    pub n_codes: usize,
    /// Only reported once the generation is completed
    pub mece_score: Option<f64>,
    pub mece_issues: Vec<MeceIssue>,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub generation_id: Uuid,
    pub status: GenerationStatus,
    pub n_answers: usize,
    pub n_clusters: usize,
    pub mece_score: Option<f64>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Generation> for GenerationSummary {
    fn from(generation: &Generation) -> Self {
        Self {
            generation_id: generation.id,
            status: generation.status,
            n_answers: generation.n_answers,
            n_clusters: generation.n_clusters,
            mece_score: generation.mece_score,
            created_by: generation.created_by.clone(),
            created_at: generation.created_at,
        }
    }
}

/// Progress = themes produced / clusters requested, capped at 100
pub fn progress_percentage(status: GenerationStatus, n_themes: usize, n_clusters: usize) -> f64 {
    match status {
        GenerationStatus::Completed | GenerationStatus::Applied => 100.0,
        _ if n_clusters == 0 => 0.0,
        _ => ((n_themes as f64 / n_clusters as f64) * 100.0).min(100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: GenerationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.coding_mode, CodingMode::OpenEnded);
        assert_eq!(config.target_language, "en");
        assert_eq!(config.clustering.min_cluster_size, 5);
        assert_eq!(config.clustering.min_samples, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_tiny_clusters() {
        let mut config = GenerationConfig::default();
        config.clustering.min_cluster_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            GenerationStatus::Processing,
            GenerationStatus::Completed,
            GenerationStatus::Applied,
            GenerationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<GenerationStatus>().unwrap(), status);
        }
        assert!("running".parse::<GenerationStatus>().is_err());
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(progress_percentage(GenerationStatus::Processing, 0, 4), 0.0);
        assert_eq!(progress_percentage(GenerationStatus::Processing, 2, 4), 50.0);
        // One cluster may propose several themes
        assert_eq!(progress_percentage(GenerationStatus::Processing, 9, 4), 100.0);
        assert_eq!(progress_percentage(GenerationStatus::Completed, 1, 4), 100.0);
        assert_eq!(progress_percentage(GenerationStatus::Processing, 0, 0), 0.0);
    }

    #[test]
    fn test_brand_mode_wire_name() {
        let config: GenerationConfig =
            serde_json::from_str(r#"{"coding_mode":"brand","hierarchy_preference":"two_level"}"#)
                .unwrap();
        assert_eq!(config.coding_mode, CodingMode::Brand);
        assert_eq!(config.hierarchy_preference, HierarchyPreference::TwoLevel);
    }
}
