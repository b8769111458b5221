//! Answer embedding cache persistence
//!
//! Keyed by (answer_id, model). A row is valid only while its `text_hash`
//! matches the hash of the answer's current text.

use chrono::Utc;
use codeframe_common::Result;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

use crate::services::vector_codec::{encode_embedding, RawEmbedding};

/// SQLite bind parameter ceiling headroom for IN lists
const ID_CHUNK_SIZE: usize = 500;

/// Cached row as stored
#[derive(Debug, Clone)]
pub struct CachedEmbedding {
    pub text_hash: String,
    pub raw: Option<RawEmbedding>,
}

/// Answer considered by apply, with whatever is cached for the model
#[derive(Debug, Clone)]
pub struct ApplyCandidate {
    pub answer_id: i64,
    pub answer_text: String,
    pub text_hash: Option<String>,
    pub raw: Option<RawEmbedding>,
}

/// Load cached rows for the given answers
pub async fn load_cached(
    pool: &SqlitePool,
    answer_ids: &[i64],
    model: &str,
) -> Result<HashMap<i64, CachedEmbedding>> {
    let mut cached = HashMap::with_capacity(answer_ids.len());

    for chunk in answer_ids.chunks(ID_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT answer_id, text_hash, typeof(embedding) AS embedding_kind, \
             CAST(embedding AS BLOB) AS embedding_bytes \
             FROM answer_embeddings WHERE model = ",
        );
        builder.push_bind(model);
        builder.push(" AND answer_id IN (");
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(pool).await?;
        for row in rows {
            let answer_id: i64 = row.get("answer_id");
            let kind: String = row.get("embedding_kind");
            let bytes: Option<Vec<u8>> = row.get("embedding_bytes");
            cached.insert(
                answer_id,
                CachedEmbedding {
                    text_hash: row.get("text_hash"),
                    raw: RawEmbedding::from_sql(&kind, bytes),
                },
            );
        }
    }

    Ok(cached)
}

/// Insert or overwrite the cached vector for (answer, model)
pub async fn upsert_embedding(
    pool: &SqlitePool,
    answer_id: i64,
    model: &str,
    embedding: &[f32],
    text_hash: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO answer_embeddings (answer_id, model, embedding, text_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(answer_id, model) DO UPDATE SET
            embedding = excluded.embedding,
            text_hash = excluded.text_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(answer_id)
    .bind(model)
    .bind(encode_embedding(embedding))
    .bind(text_hash)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Answers of a category eligible for apply, joined with the cache
///
/// Only uncoded answers unless `include_coded`.
pub async fn load_apply_candidates(
    pool: &SqlitePool,
    category_id: i64,
    model: &str,
    include_coded: bool,
) -> Result<Vec<ApplyCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT a.id AS answer_id, a.answer_text, e.text_hash,
               typeof(e.embedding) AS embedding_kind,
               CAST(e.embedding AS BLOB) AS embedding_bytes
        FROM answers a
        LEFT JOIN answer_embeddings e ON e.answer_id = a.id AND e.model = ?
        WHERE a.category_id = ? AND (? OR a.selected_code IS NULL)
        ORDER BY a.id
        "#,
    )
    .bind(model)
    .bind(category_id)
    .bind(include_coded)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let kind: String = row.get("embedding_kind");
            let bytes: Option<Vec<u8>> = row.get("embedding_bytes");
            ApplyCandidate {
                answer_id: row.get("answer_id"),
                answer_text: row.get("answer_text"),
                text_hash: row.get("text_hash"),
                raw: RawEmbedding::from_sql(&kind, bytes),
            }
        })
        .collect())
}
