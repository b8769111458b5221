//! Configuration resolution for the codeframe engine
//!
//! Collaborator endpoints resolve with ENV → TOML → default priority;
//! tuning values come from the TOML file or compiled defaults.

use codeframe_common::config::TomlConfig;
use codeframe_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::services::collaborators::{ClusteringClient, EmbeddingClient, HierarchyClient, MeceClient};
use crate::services::{Collaborators, JobSettings, OrchestratorSettings};

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:8001";
pub const DEFAULT_CLUSTERING_URL: &str = "http://localhost:8002";
pub const DEFAULT_HIERARCHY_URL: &str = "http://localhost:8003";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CLUSTERING_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PROPOSAL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MECE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PROPOSAL_RATE: u32 = 10;

/// Fully resolved engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub embedding_url: String,
    pub clustering_url: String,
    pub hierarchy_url: String,
    /// MECE validation is skipped when unset
    pub mece_url: Option<String>,
    pub embedding_timeout: Duration,
    pub clustering_timeout: Duration,
    pub proposal_timeout: Duration,
    pub mece_timeout: Duration,
    pub proposal_rate_per_second: u32,
    pub orchestrator: OrchestratorSettings,
}

impl EngineConfig {
    pub fn resolve(toml: &TomlConfig) -> Self {
        let services = &toml.services;
        let generation = &toml.generation;
        let defaults = OrchestratorSettings::default();
        let job_defaults = JobSettings::default();

        let secs = |value: Option<u64>, default: u64| Duration::from_secs(value.unwrap_or(default));

        Self {
            embedding_url: resolve_url(
                "embedding",
                "CODEFRAME_EMBEDDING_URL",
                services.embedding_url.as_deref(),
            )
            .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string()),
            clustering_url: resolve_url(
                "clustering",
                "CODEFRAME_CLUSTERING_URL",
                services.clustering_url.as_deref(),
            )
            .unwrap_or_else(|| DEFAULT_CLUSTERING_URL.to_string()),
            hierarchy_url: resolve_url(
                "hierarchy",
                "CODEFRAME_HIERARCHY_URL",
                services.hierarchy_url.as_deref(),
            )
            .unwrap_or_else(|| DEFAULT_HIERARCHY_URL.to_string()),
            mece_url: resolve_url("mece", "CODEFRAME_MECE_URL", services.mece_url.as_deref()),
            embedding_timeout: secs(services.embedding_timeout_secs, DEFAULT_EMBEDDING_TIMEOUT_SECS),
            clustering_timeout: secs(services.clustering_timeout_secs, DEFAULT_CLUSTERING_TIMEOUT_SECS),
            proposal_timeout: secs(services.proposal_timeout_secs, DEFAULT_PROPOSAL_TIMEOUT_SECS),
            mece_timeout: secs(services.mece_timeout_secs, DEFAULT_MECE_TIMEOUT_SECS),
            proposal_rate_per_second: services.proposal_rate_per_second.unwrap_or(DEFAULT_PROPOSAL_RATE),
            orchestrator: OrchestratorSettings {
                min_answers: generation.min_answers.unwrap_or(defaults.min_answers),
                seconds_per_cluster: generation
                    .seconds_per_cluster
                    .unwrap_or(defaults.seconds_per_cluster),
                default_embedding_model: non_empty_env("CODEFRAME_EMBEDDING_MODEL")
                    .or_else(|| services.embedding_model.clone())
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                jobs: JobSettings {
                    workers: generation.workers_per_generation.unwrap_or(job_defaults.workers),
                    max_attempts: generation.max_job_attempts.unwrap_or(job_defaults.max_attempts),
                    mece_overlap_threshold: toml
                        .mece
                        .overlap_threshold
                        .unwrap_or(job_defaults.mece_overlap_threshold),
                    mece_gap_threshold: toml
                        .mece
                        .gap_threshold
                        .unwrap_or(job_defaults.mece_gap_threshold),
                    ..job_defaults
                },
            },
        }
    }

    /// Build HTTP collaborator clients
    pub fn build_collaborators(&self) -> Result<Collaborators> {
        let mece = match &self.mece_url {
            Some(url) => Some(Arc::new(MeceClient::new(url, self.mece_timeout)?) as _),
            None => {
                info!("No MECE validator configured, validation disabled");
                None
            }
        };

        Ok(Collaborators {
            embedding: Arc::new(EmbeddingClient::new(&self.embedding_url, self.embedding_timeout)?),
            clustering: Arc::new(ClusteringClient::new(&self.clustering_url, self.clustering_timeout)?),
            proposer: Arc::new(HierarchyClient::new(
                &self.hierarchy_url,
                self.proposal_timeout,
                self.proposal_rate_per_second,
            )?),
            mece,
        })
    }
}

/// ENV first, then TOML; None when neither is set
fn resolve_url(service: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    if let Some(url) = non_empty_env(env_var) {
        info!("{} service URL loaded from environment: {}", service, url);
        return Some(url);
    }

    toml_value
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(|url| {
            info!("{} service URL loaded from TOML config: {}", service, url);
            url.to_string()
        })
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "CODEFRAME_EMBEDDING_URL",
            "CODEFRAME_CLUSTERING_URL",
            "CODEFRAME_HIERARCHY_URL",
            "CODEFRAME_MECE_URL",
            "CODEFRAME_EMBEDDING_MODEL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = EngineConfig::resolve(&TomlConfig::default());
        assert_eq!(config.embedding_url, DEFAULT_EMBEDDING_URL);
        assert_eq!(config.clustering_url, DEFAULT_CLUSTERING_URL);
        assert_eq!(config.hierarchy_url, DEFAULT_HIERARCHY_URL);
        assert!(config.mece_url.is_none());
        assert_eq!(config.embedding_timeout, Duration::from_secs(120));
        assert_eq!(config.proposal_timeout, Duration::from_secs(60));
        assert_eq!(config.proposal_rate_per_second, 10);
        assert_eq!(config.orchestrator.min_answers, 10);
        assert_eq!(config.orchestrator.seconds_per_cluster, 5);
        assert_eq!(config.orchestrator.jobs.workers, 4);
        assert_eq!(config.orchestrator.jobs.max_attempts, 3);
        assert_eq!(config.orchestrator.default_embedding_model, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    #[serial]
    fn test_env_overrides_toml() {
        clear_env();
        let mut toml = TomlConfig::default();
        toml.services.embedding_url = Some("http://toml-embed:9000".to_string());
        toml.services.clustering_url = Some("http://toml-cluster:9000".to_string());
        toml.services.mece_url = Some("http://toml-mece:9000".to_string());

        std::env::set_var("CODEFRAME_EMBEDDING_URL", "http://env-embed:9000");
        let config = EngineConfig::resolve(&toml);
        clear_env();

        assert_eq!(config.embedding_url, "http://env-embed:9000");
        assert_eq!(config.clustering_url, "http://toml-cluster:9000");
        assert_eq!(config.mece_url.as_deref(), Some("http://toml-mece:9000"));
    }

    #[test]
    #[serial]
    fn test_toml_tuning_values() {
        clear_env();
        let mut toml = TomlConfig::default();
        toml.generation.min_answers = Some(20);
        toml.generation.workers_per_generation = Some(8);
        toml.mece.overlap_threshold = Some(0.9);
        toml.services.embedding_model = Some("custom-model".to_string());

        let config = EngineConfig::resolve(&toml);
        assert_eq!(config.orchestrator.min_answers, 20);
        assert_eq!(config.orchestrator.jobs.workers, 8);
        assert_eq!(config.orchestrator.jobs.mece_overlap_threshold, 0.9);
        assert_eq!(config.orchestrator.jobs.mece_gap_threshold, 0.5);
        assert_eq!(config.orchestrator.default_embedding_model, "custom-model");
    }

    #[test]
    #[serial]
    fn test_build_collaborators_without_mece() {
        clear_env();
        let config = EngineConfig::resolve(&TomlConfig::default());
        let collaborators = config.build_collaborators().unwrap();
        assert!(collaborators.mece.is_none());
    }
}
