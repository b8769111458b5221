//! Hash-validated embedding reuse

mod helpers;

use codeframe_engine::db;
use codeframe_engine::services::embedding_cache::{text_hash, EmbeddingCache};
use helpers::{create_test_db, seed_answers, seed_category, FakeEmbedding, DEFAULT_VECTOR};
use std::sync::Arc;

const MODEL: &str = "text-embedding-3-small";

#[tokio::test]
async fn test_unchanged_text_served_from_cache() {
    let (_dir, pool) = create_test_db().await;
    let category_id = seed_category(&pool, "Cache").await;
    seed_answers(&pool, category_id, &["first", "second", "third"]).await;
    let answers = db::answers::load_uncoded_answers(&pool, category_id).await.unwrap();

    let provider = Arc::new(FakeEmbedding::new().with_vector("second", vec![0.1, 0.2, 0.3]));
    let cache = EmbeddingCache::new(pool.clone(), provider.clone());

    let first = cache.ensure_embeddings(&answers, MODEL).await.unwrap();
    assert_eq!(first.computed, 3);
    assert_eq!(first.cached, 0);
    assert_eq!(provider.calls(), 1);

    let second = cache.ensure_embeddings(&answers, MODEL).await.unwrap();
    assert_eq!(second.computed, 0);
    assert_eq!(second.cached, 3);
    assert_eq!(provider.calls(), 1);
    assert_eq!(second.vectors[&answers[1].id], vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn test_changed_text_recomputes_only_that_answer() {
    let (_dir, pool) = create_test_db().await;
    let category_id = seed_category(&pool, "Cache").await;
    let ids = seed_answers(&pool, category_id, &["alpha", "beta", "gamma"]).await;

    let provider = Arc::new(FakeEmbedding::new());
    let cache = EmbeddingCache::new(pool.clone(), provider.clone());

    let answers = db::answers::load_uncoded_answers(&pool, category_id).await.unwrap();
    cache.ensure_embeddings(&answers, MODEL).await.unwrap();
    assert_eq!(provider.texts_embedded(), 3);

    sqlx::query("UPDATE answers SET answer_text = 'beta, edited' WHERE id = ?")
        .bind(ids[1])
        .execute(&pool)
        .await
        .unwrap();

    let answers = db::answers::load_uncoded_answers(&pool, category_id).await.unwrap();
    let report = cache.ensure_embeddings(&answers, MODEL).await.unwrap();

    assert_eq!(report.computed, 1);
    assert_eq!(report.cached, 2);
    assert_eq!(provider.calls(), 2);
    assert_eq!(provider.texts_embedded(), 4);

    let cached = db::embeddings::load_cached(&pool, &ids, MODEL).await.unwrap();
    assert_eq!(cached[&ids[1]].text_hash, text_hash("beta, edited"));
}

#[tokio::test]
async fn test_models_cached_independently() {
    let (_dir, pool) = create_test_db().await;
    let category_id = seed_category(&pool, "Cache").await;
    seed_answers(&pool, category_id, &["one"]).await;
    let answers = db::answers::load_uncoded_answers(&pool, category_id).await.unwrap();

    let provider = Arc::new(FakeEmbedding::new());
    let cache = EmbeddingCache::new(pool.clone(), provider.clone());

    cache.ensure_embeddings(&answers, MODEL).await.unwrap();
    let other = cache.ensure_embeddings(&answers, "other-model").await.unwrap();
    assert_eq!(other.computed, 1);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_legacy_json_text_embedding_reused() {
    let (_dir, pool) = create_test_db().await;
    let category_id = seed_category(&pool, "Legacy").await;
    let ids = seed_answers(&pool, category_id, &["legacy answer"]).await;

    sqlx::query(
        r#"
        INSERT INTO answer_embeddings (answer_id, model, embedding, text_hash, created_at, updated_at)
        VALUES (?, ?, '[0.5, 0.25, 0.0]', ?, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')
        "#,
    )
    .bind(ids[0])
    .bind(MODEL)
    .bind(text_hash("legacy answer"))
    .execute(&pool)
    .await
    .unwrap();

    let provider = Arc::new(FakeEmbedding::new());
    let cache = EmbeddingCache::new(pool.clone(), provider.clone());
    let answers = db::answers::load_uncoded_answers(&pool, category_id).await.unwrap();

    let report = cache.ensure_embeddings(&answers, MODEL).await.unwrap();
    assert_eq!(report.cached, 1);
    assert_eq!(provider.calls(), 0);
    assert_eq!(report.vectors[&ids[0]], vec![0.5, 0.25, 0.0]);
}

#[tokio::test]
async fn test_undecodable_cached_value_recomputed() {
    let (_dir, pool) = create_test_db().await;
    let category_id = seed_category(&pool, "Broken").await;
    let ids = seed_answers(&pool, category_id, &["broken answer"]).await;

    sqlx::query(
        r#"
        INSERT INTO answer_embeddings (answer_id, model, embedding, text_hash, created_at, updated_at)
        VALUES (?, ?, 'not a vector', ?, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')
        "#,
    )
    .bind(ids[0])
    .bind(MODEL)
    .bind(text_hash("broken answer"))
    .execute(&pool)
    .await
    .unwrap();

    let provider = Arc::new(FakeEmbedding::new());
    let cache = EmbeddingCache::new(pool.clone(), provider.clone());
    let answers = db::answers::load_uncoded_answers(&pool, category_id).await.unwrap();

    let report = cache.ensure_embeddings(&answers, MODEL).await.unwrap();
    assert_eq!(report.computed, 1);
    assert_eq!(report.vectors[&ids[0]], DEFAULT_VECTOR.to_vec());
}

#[tokio::test]
async fn test_cache_write_failure_still_returns_vectors() {
    let (_dir, pool) = create_test_db().await;
    let category_id = seed_category(&pool, "Cache").await;
    let ids = seed_answers(&pool, category_id, &["north", "south"]).await;
    let answers = db::answers::load_uncoded_answers(&pool, category_id).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER block_cache BEFORE INSERT ON answer_embeddings \
         BEGIN SELECT RAISE(ABORT, 'cache unavailable'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let provider = Arc::new(FakeEmbedding::new().with_vector("south", vec![0.5, 0.5, 0.0]));
    let cache = EmbeddingCache::new(pool.clone(), provider.clone());

    let report = cache.ensure_embeddings(&answers, MODEL).await.unwrap();
    assert_eq!(report.computed, 2);
    assert_eq!(report.vectors.len(), 2);
    assert_eq!(report.vectors[&ids[0]], DEFAULT_VECTOR.to_vec());
    assert_eq!(report.vectors[&ids[1]], vec![0.5, 0.5, 0.0]);

    let cached = db::embeddings::load_cached(&pool, &ids, MODEL).await.unwrap();
    assert!(cached.is_empty());
}
