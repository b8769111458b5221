//! In-process collaborators with call counters

use async_trait::async_trait;
use codeframe_common::{Error, Result};
use codeframe_engine::models::AnswerText;
use codeframe_engine::services::collaborators::{
    ClusterResult, ClusteringProvider, ClusteringRequest, ClusteringResponse, EmbeddingInput,
    EmbeddingOutput, EmbeddingProvider, HierarchyProposer, MeceReport, MeceRequest, MeceValidator,
    ProposalRequest, ProposalResponse, ProposedCode, ProposedTheme,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Vector for any text without an explicit override
pub const DEFAULT_VECTOR: [f32; 3] = [0.0, 0.0, 1.0];

/// Embedding service returning fixed vectors per text
#[derive(Default)]
pub struct FakeEmbedding {
    calls: AtomicUsize,
    texts_embedded: AtomicUsize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
}

impl FakeEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedding {
    async fn embed(&self, _model: &str, texts: &[EmbeddingInput]) -> Result<Vec<EmbeddingOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);

        let vectors = self.vectors.lock().unwrap();
        Ok(texts
            .iter()
            .map(|input| EmbeddingOutput {
                id: input.id.clone(),
                embedding: vectors
                    .get(&input.text)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_VECTOR.to_vec()),
            })
            .collect())
    }
}

/// Groups answers in request order into clusters of `min_cluster_size`;
/// a trailing partial group is noise
#[derive(Default)]
pub struct FakeClustering {
    calls: AtomicUsize,
}

impl FakeClustering {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusteringProvider for FakeClustering {
    async fn cluster(&self, request: &ClusteringRequest) -> Result<ClusteringResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let size = request.config.min_cluster_size.max(1);
        let mut clusters = BTreeMap::new();
        let mut noise_count = 0;

        for (index, chunk) in request.answers.chunks(size).enumerate() {
            if chunk.len() < size {
                noise_count += chunk.len();
                continue;
            }
            let texts: Vec<AnswerText> = chunk
                .iter()
                .map(|a| AnswerText {
                    id: a.id,
                    text: a.text.clone(),
                    language: a.language.clone(),
                })
                .collect();
            clusters.insert(
                index as i64,
                ClusterResult {
                    size: texts.len(),
                    texts,
                    confidence: 0.9,
                },
            );
        }

        Ok(ClusteringResponse {
            n_clusters: clusters.len(),
            noise_count,
            clusters,
        })
    }
}

/// Proposal service: "Theme {cluster}" with codes "Code {cluster}A/B"
#[derive(Default)]
pub struct FakeProposer {
    calls: AtomicUsize,
    failing_clusters: Vec<i64>,
    failing_first: usize,
    delay: Option<Duration>,
    response: Option<ProposalResponse>,
}

impl FakeProposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt for these clusters fails upstream
    pub fn failing(mut self, cluster_ids: &[i64]) -> Self {
        self.failing_clusters = cluster_ids.to_vec();
        self
    }

    /// The first `n` calls fail upstream, whatever the cluster
    pub fn failing_first(mut self, n: usize) -> Self {
        self.failing_first = n;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fixed response for every cluster
    pub fn responding(mut self, response: ProposalResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn theme(name: &str, codes: &[&str]) -> ProposedTheme {
    ProposedTheme {
        name: name.to_string(),
        description: None,
        confidence: Some(0.9),
        codes: codes
            .iter()
            .map(|code| ProposedCode {
                name: code.to_string(),
                description: None,
                confidence: Some(0.8),
                brand_variants: None,
                example_texts: None,
            })
            .collect(),
    }
}

#[async_trait]
impl HierarchyProposer for FakeProposer {
    async fn propose(&self, request: &ProposalRequest) -> Result<ProposalResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if call < self.failing_first || self.failing_clusters.contains(&request.cluster_id) {
            return Err(Error::Upstream {
                service: "hierarchy".to_string(),
                message: "HTTP 503: proposal backend unavailable".to_string(),
            });
        }

        if let Some(response) = &self.response {
            return Ok(response.clone());
        }

        let id = request.cluster_id;
        Ok(ProposalResponse {
            themes: vec![theme(
                &format!("Theme {}", id),
                &[&format!("Code {}A", id), &format!("Code {}B", id)],
            )],
        })
    }
}

#[derive(Default)]
pub struct FakeMece {
    calls: AtomicUsize,
}

impl FakeMece {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeceValidator for FakeMece {
    async fn validate(&self, _request: &MeceRequest) -> Result<MeceReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MeceReport {
            score: 0.92,
            issues: Vec::new(),
        })
    }
}
