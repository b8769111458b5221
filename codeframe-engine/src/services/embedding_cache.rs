//! Content-addressed embedding cache
//!
//! Answer vectors are cached per (answer, model) together with the SHA-256
//! of the text they were computed from. A cached vector is reused only while
//! that hash still matches the answer's current text; anything missing or
//! stale is recomputed in a single batched embedding call.

use codeframe_common::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::AnswerText;
use crate::services::collaborators::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};
use crate::services::vector_codec::decode_embedding;
use crate::utils::db_retry::retry_on_lock;

/// Lowercase hex SHA-256 of an answer text
pub fn text_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Vectors for every requested answer plus where they came from
#[derive(Debug, Default)]
pub struct EmbeddingReport {
    pub vectors: HashMap<i64, Vec<f32>>,
    pub cached: usize,
    pub computed: usize,
}

pub struct EmbeddingCache {
    db: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingCache {
    pub fn new(db: SqlitePool, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { db, provider }
    }

    /// Make sure every answer has a valid cached vector for `model`
    ///
    /// Cache write failures are logged and do not fail the call; the
    /// returned vectors are complete either way.
    pub async fn ensure_embeddings(&self, answers: &[AnswerText], model: &str) -> Result<EmbeddingReport> {
        let ids: Vec<i64> = answers.iter().map(|a| a.id).collect();
        let cached = db::embeddings::load_cached(&self.db, &ids, model).await?;

        let mut report = EmbeddingReport::default();
        let mut stale: Vec<(&AnswerText, String)> = Vec::new();
        let mut seen = HashSet::with_capacity(answers.len());

        for answer in answers {
            if !seen.insert(answer.id) {
                continue;
            }

            let hash = text_hash(&answer.text);
            let reusable = cached
                .get(&answer.id)
                .filter(|entry| entry.text_hash == hash)
                .and_then(|entry| entry.raw.as_ref())
                .and_then(|raw| match decode_embedding(raw) {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        debug!(answer_id = answer.id, "Cached embedding undecodable, recomputing: {}", e);
                        None
                    }
                });

            match reusable {
                Some(vector) => {
                    report.vectors.insert(answer.id, vector);
                    report.cached += 1;
                }
                None => stale.push((answer, hash)),
            }
        }

        if stale.is_empty() {
            debug!(model, cached = report.cached, "All embeddings served from cache");
            return Ok(report);
        }

        let inputs: Vec<EmbeddingInput> = stale
            .iter()
            .map(|(answer, _)| EmbeddingInput {
                id: answer.id.to_string(),
                text: answer.text.clone(),
            })
            .collect();

        let mut fresh = index_outputs(self.provider.embed(model, &inputs).await?);
        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db).await?;

        for (answer, hash) in &stale {
            let vector = fresh.remove(&answer.id.to_string()).ok_or_else(|| Error::Upstream {
                service: "embedding".to_string(),
                message: format!("No embedding returned for answer {}", answer.id),
            })?;

            let write = retry_on_lock("embedding cache write", max_wait_ms, || {
                db::embeddings::upsert_embedding(&self.db, answer.id, model, &vector, hash)
            })
            .await;
            if let Err(e) = write {
                warn!(answer_id = answer.id, model, "Failed to cache embedding: {}", e);
            }

            report.vectors.insert(answer.id, vector);
            report.computed += 1;
        }

        info!(
            model,
            cached = report.cached,
            computed = report.computed,
            "Embeddings ensured"
        );

        Ok(report)
    }

    /// Embed every node of a generation that has no embedding yet
    ///
    /// Returns the number of nodes embedded.
    pub async fn ensure_node_embeddings(&self, generation_id: Uuid, model: &str) -> Result<usize> {
        let nodes = db::hierarchy::load_nodes(&self.db, generation_id).await?;
        let missing: Vec<_> = nodes.into_iter().filter(|n| n.embedding.is_none()).collect();

        if missing.is_empty() {
            return Ok(0);
        }

        let inputs: Vec<EmbeddingInput> = missing
            .iter()
            .map(|node| EmbeddingInput {
                id: node.id.to_string(),
                text: node.embedding_text(),
            })
            .collect();

        let mut fresh = index_outputs(self.provider.embed(model, &inputs).await?);

        for node in &missing {
            let vector = fresh.remove(&node.id.to_string()).ok_or_else(|| Error::Upstream {
                service: "embedding".to_string(),
                message: format!("No embedding returned for node {}", node.id),
            })?;
            db::hierarchy::update_node_embedding(&self.db, node.id, &vector).await?;
        }

        debug!(generation_id = %generation_id, count = missing.len(), "Node embeddings computed");
        Ok(missing.len())
    }
}

fn index_outputs(outputs: Vec<EmbeddingOutput>) -> HashMap<String, Vec<f32>> {
    outputs.into_iter().map(|o| (o.id, o.embedding)).collect()
}
