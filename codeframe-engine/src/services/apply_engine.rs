//! Apply engine
//!
//! Assigns a finished codeframe back onto the answer corpus: each answer
//! goes to the code node whose embedding is most similar to its own, when
//! that similarity reaches the threshold. Everything else stays pending
//! for human coders.

use codeframe_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::{Generation, NodeType};
use crate::services::embedding_cache::{text_hash, EmbeddingCache};
use crate::services::vector_codec::decode_embedding;
use crate::utils::db_retry::retry_on_lock;

/// Cosine similarity; 0.0 for empty input, mismatched lengths or zero norms
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Code node reduced to what matching needs
#[derive(Debug, Clone)]
pub struct CodeVector {
    pub node_id: Uuid,
    pub name: String,
    pub embedding: Vec<f32>,
}

/// Most similar code (first wins on ties)
pub fn best_match<'a>(vector: &[f32], codes: &'a [CodeVector]) -> Option<(&'a CodeVector, f32)> {
    codes
        .iter()
        .map(|code| (code, cosine_similarity(vector, &code.embedding)))
        .fold(None, |best, (code, similarity)| match best {
            Some((_, best_similarity)) if best_similarity >= similarity => best,
            _ => Some((code, similarity)),
        })
}

/// Apply outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub generation_id: Uuid,
    pub total_answers: usize,
    pub assigned: usize,
    pub pending: usize,
    pub threshold: f32,
}

#[derive(Debug)]
struct Assignment {
    answer_id: i64,
    node_id: Uuid,
    code_name: String,
    similarity: f32,
}

pub struct ApplyEngine {
    db: SqlitePool,
    embedding_cache: Arc<EmbeddingCache>,
}

impl ApplyEngine {
    pub fn new(db: SqlitePool, embedding_cache: Arc<EmbeddingCache>) -> Self {
        Self { db, embedding_cache }
    }

    /// Assign codes to the category's answers
    ///
    /// Only answers with a cached embedding for the generation's model
    /// take part; stale or undecodable ones are counted as pending.
    pub async fn apply(
        &self,
        generation: &Generation,
        threshold: f32,
        overwrite_existing: bool,
    ) -> Result<ApplyReport> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidInput(format!(
                "Threshold must be within 0.0-1.0 (got {})",
                threshold
            )));
        }
        if !generation.status.is_applicable() {
            return Err(Error::Conflict(format!(
                "Generation {} is {}; only completed generations can be applied",
                generation.id,
                generation.status.as_str()
            )));
        }

        let model = generation.embedding_model.as_str();
        self.embedding_cache
            .ensure_node_embeddings(generation.id, model)
            .await?;

        let codes: Vec<CodeVector> = db::hierarchy::load_nodes(&self.db, generation.id)
            .await?
            .into_iter()
            .filter(|n| n.node_type == NodeType::Code)
            .filter_map(|n| {
                n.embedding.map(|embedding| CodeVector {
                    node_id: n.id,
                    name: n.name,
                    embedding,
                })
            })
            .collect();

        let candidates = db::embeddings::load_apply_candidates(
            &self.db,
            generation.category_id,
            model,
            overwrite_existing,
        )
        .await?;

        let mut total_answers = 0;
        let mut assignments = Vec::new();

        for candidate in candidates {
            let Some(raw) = candidate.raw else {
                continue;
            };
            total_answers += 1;

            if candidate.text_hash.as_deref() != Some(text_hash(&candidate.answer_text).as_str()) {
                debug!(answer_id = candidate.answer_id, "Cached embedding is stale, leaving pending");
                continue;
            }

            let vector = match decode_embedding(&raw) {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(answer_id = candidate.answer_id, "Skipping undecodable answer embedding: {}", e);
                    continue;
                }
            };

            if let Some((code, similarity)) = best_match(&vector, &codes) {
                if similarity >= threshold {
                    assignments.push(Assignment {
                        answer_id: candidate.answer_id,
                        node_id: code.node_id,
                        code_name: code.name.clone(),
                        similarity,
                    });
                }
            }
        }

        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db).await?;
        retry_on_lock("apply codeframe", max_wait_ms, || {
            self.write_assignments(generation.id, &assignments)
        })
        .await?;

        let report = ApplyReport {
            generation_id: generation.id,
            total_answers,
            assigned: assignments.len(),
            pending: total_answers - assignments.len(),
            threshold,
        };

        info!(
            generation_id = %generation.id,
            codes = codes.len(),
            total_answers = report.total_answers,
            assigned = report.assigned,
            pending = report.pending,
            threshold,
            "Codeframe applied"
        );

        Ok(report)
    }

    async fn write_assignments(&self, generation_id: Uuid, assignments: &[Assignment]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for a in assignments {
            db::answers::record_assignment(
                &mut tx,
                a.answer_id,
                generation_id,
                a.node_id,
                &a.code_name,
                a.similarity,
            )
            .await?;
        }

        if !db::generations::mark_applied(&mut tx, generation_id).await? {
            return Err(Error::Conflict(format!(
                "Generation {} changed status during apply",
                generation_id
            )));
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(name: &str, embedding: Vec<f32>) -> CodeVector {
        CodeVector {
            node_id: Uuid::new_v4(),
            name: name.to_string(),
            embedding,
        }
    }

    #[test]
    fn test_cosine_identity_and_opposite() {
        let v = vec![0.3, -1.2, 2.5];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs_are_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_best_match_picks_argmax() {
        let codes = vec![
            code("Price", vec![1.0, 0.0]),
            code("Service", vec![0.0, 1.0]),
            code("Mixed", vec![1.0, 1.0]),
        ];

        let (best, similarity) = best_match(&[0.1, 0.9], &codes).unwrap();
        assert_eq!(best.name, "Service");
        assert!(similarity > 0.99);
    }

    #[test]
    fn test_best_match_first_wins_ties_and_empty_is_none() {
        let codes = vec![code("A", vec![1.0, 0.0]), code("B", vec![1.0, 0.0])];
        assert_eq!(best_match(&[1.0, 0.0], &codes).unwrap().0.name, "A");
        assert!(best_match(&[1.0, 0.0], &[]).is_none());
    }
}
