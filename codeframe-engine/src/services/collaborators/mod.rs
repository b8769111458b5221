//! External collaborator contracts
//!
//! The engine never embeds, clusters, names or scores anything itself. It
//! reaches four external services through these traits; HTTP clients are
//! built from configuration and injected into the orchestrator, and tests
//! substitute in-process fakes.

pub mod clustering_client;
pub mod embedding_client;
pub mod hierarchy_client;
pub mod mece_client;

pub use clustering_client::ClusteringClient;
pub use embedding_client::EmbeddingClient;
pub use hierarchy_client::HierarchyClient;
pub use mece_client::MeceClient;

use async_trait::async_trait;
use codeframe_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AnswerText, ClusteringParameters, CodingMode, HierarchyPreference, MeceIssue, NodeType,
};

/// Transport-level collaborator failure
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {0}: {1}")]
    Api(u16, String),

    #[error("Invalid response: {0}")]
    Parse(String),
}

impl CollaboratorError {
    /// Convert into the service-level error, naming the collaborator
    pub fn into_upstream(self, service: &str) -> Error {
        Error::Upstream {
            service: service.to_string(),
            message: self.to_string(),
        }
    }
}

// ============================================================================
// Embedding
// ============================================================================

/// One text to embed; `id` is echoed back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingInput {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOutput {
    pub id: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub texts: &'a [EmbeddingInput],
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<EmbeddingOutput>,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every input in one call
    async fn embed(&self, model: &str, texts: &[EmbeddingInput]) -> Result<Vec<EmbeddingOutput>>;
}

// ============================================================================
// Clustering
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringAnswer {
    pub id: i64,
    pub text: String,
    pub language: Option<String>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringRequest {
    pub answer_ids: Vec<i64>,
    pub answers: Vec<ClusteringAnswer>,
    pub config: ClusteringParameters,
}

/// One cluster as returned by the clustering service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResult {
    pub texts: Vec<AnswerText>,
    pub size: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringResponse {
    pub n_clusters: usize,
    #[serde(default)]
    pub noise_count: usize,
    /// Keyed by cluster id (JSON object keys are numeric strings)
    pub clusters: BTreeMap<i64, ClusterResult>,
}

#[async_trait]
pub trait ClusteringProvider: Send + Sync {
    async fn cluster(&self, request: &ClusteringRequest) -> Result<ClusteringResponse>;
}

// ============================================================================
// Hierarchy proposal
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub generation_id: Uuid,
    pub cluster_id: i64,
    pub texts: Vec<AnswerText>,
    pub category_name: String,
    pub category_description: Option<String>,
    pub target_language: String,
    pub existing_codes: Vec<String>,
    pub hierarchy_preference: HierarchyPreference,
    pub coding_mode: CodingMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedCode {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub brand_variants: Option<BTreeMap<String, u32>>,
    #[serde(default)]
    pub example_texts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedTheme {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub codes: Vec<ProposedCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalResponse {
    pub themes: Vec<ProposedTheme>,
}

#[async_trait]
pub trait HierarchyProposer: Send + Sync {
    async fn propose(&self, request: &ProposalRequest) -> Result<ProposalResponse>;
}

// ============================================================================
// MECE validation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeceNode {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub node_type: NodeType,
    pub name: String,
    pub description: Option<String>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeceRequest {
    pub nodes: Vec<MeceNode>,
    pub overlap_threshold: f32,
    pub gap_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeceReport {
    /// 0-100
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<MeceIssue>,
}

#[async_trait]
pub trait MeceValidator: Send + Sync {
    async fn validate(&self, request: &MeceRequest) -> Result<MeceReport>;
}

// ============================================================================
// Shared HTTP transport
// ============================================================================

/// JSON-over-HTTP POST transport shared by the collaborator clients
#[derive(Debug, Clone)]
pub(crate) struct HttpCollaborator {
    service: &'static str,
    base_url: String,
    client: reqwest::Client,
}

impl HttpCollaborator {
    pub(crate) fn new(service: &'static str, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("codeframe-engine/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build {} client: {}", service, e)))?;

        Ok(Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub(crate) fn service(&self) -> &'static str {
        self.service
    }

    /// POST `body` to `{base_url}{path}` and decode the JSON response
    pub(crate) async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        self.send(path, body)
            .await
            .map_err(|e| e.into_upstream(self.service))
    }

    async fn send<Req, Resp>(&self, path: &str, body: &Req) -> std::result::Result<Resp, CollaboratorError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(service = self.service, url = %url, "Calling collaborator");

        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout(e.to_string())
            } else {
                CollaboratorError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Api(status.as_u16(), error_text));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| CollaboratorError::Parse(e.to_string()))
    }
}
