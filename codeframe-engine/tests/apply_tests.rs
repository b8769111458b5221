//! Applying a finished codeframe onto answers

mod helpers;

use codeframe_common::Error;
use codeframe_engine::db;
use codeframe_engine::db::answers::CODING_SOURCE_AUTO;
use codeframe_engine::models::{CodingMode, GenerationConfig, GenerationStatus};
use codeframe_engine::services::collaborators::ProposalResponse;
use codeframe_engine::services::StartRequest;
use helpers::{answer_row, seed_answers, seed_category, theme, FakeEmbedding, FakeProposer, TestEngine};
use std::time::Duration;
use uuid::Uuid;

const EXACT: &str = "cheap price";
const NEAR: &str = "mostly about the price";

/// Single "Cost" theme with one "Price" code; EXACT answer has similarity
/// 1.0 to it, NEAR answer 0.85, the rest 0.0
fn price_engine_fakes() -> (FakeEmbedding, FakeProposer) {
    let embedding = FakeEmbedding::new()
        .with_vector("Price", vec![1.0, 0.0, 0.0])
        .with_vector(EXACT, vec![1.0, 0.0, 0.0])
        .with_vector(NEAR, vec![0.85, (1.0f32 - 0.85 * 0.85).sqrt(), 0.0]);
    let proposer = FakeProposer::new().responding(ProposalResponse {
        themes: vec![theme("Cost", &["Price"])],
    });
    (embedding, proposer)
}

struct Seeded {
    generation_id: Uuid,
    exact_id: i64,
    near_id: i64,
}

async fn completed_price_generation(engine: &TestEngine) -> Seeded {
    let category_id = seed_category(&engine.db, "Why not buy").await;
    let mut texts = vec![EXACT, NEAR];
    let fillers: Vec<String> = (1..=8).map(|i| format!("unrelated remark {}", i)).collect();
    texts.extend(fillers.iter().map(String::as_str));
    let ids = seed_answers(&engine.db, category_id, &texts).await;

    let handle = engine
        .orchestrator
        .start_generation(StartRequest {
            category_id,
            answer_ids: None,
            config: GenerationConfig {
                coding_mode: CodingMode::Brand,
                ..GenerationConfig::default()
            },
            created_by: None,
        })
        .await
        .unwrap();

    let report = engine.wait_for_terminal(handle.generation_id).await;
    assert_eq!(report.status, GenerationStatus::Completed);

    Seeded {
        generation_id: handle.generation_id,
        exact_id: ids[0],
        near_id: ids[1],
    }
}

#[tokio::test]
async fn test_threshold_gates_assignment() {
    let (embedding, proposer) = price_engine_fakes();
    let engine = TestEngine::with_fakes(embedding, proposer).await;
    let seeded = completed_price_generation(&engine).await;

    let report = engine
        .orchestrator
        .apply_codeframe(seeded.generation_id, Some(0.9), false)
        .await
        .unwrap();

    assert_eq!(report.total_answers, 10);
    assert_eq!(report.assigned, 1);
    assert_eq!(report.pending, 9);

    let (code, source) = answer_row(&engine.db, seeded.exact_id).await;
    assert_eq!(code.as_deref(), Some("Price"));
    assert_eq!(source.as_deref(), Some(CODING_SOURCE_AUTO));

    // Best similarity 0.85 stays unassigned at 0.9
    let (code, _) = answer_row(&engine.db, seeded.near_id).await;
    assert!(code.is_none());

    let status = engine
        .orchestrator
        .generation_status(seeded.generation_id)
        .await
        .unwrap();
    assert_eq!(status.status, GenerationStatus::Applied);

    // Re-apply at a lower threshold; already coded answers are skipped
    let report = engine
        .orchestrator
        .apply_codeframe(seeded.generation_id, Some(0.84), false)
        .await
        .unwrap();
    assert_eq!(report.total_answers, 9);
    assert_eq!(report.assigned, 1);

    let (code, _) = answer_row(&engine.db, seeded.near_id).await;
    assert_eq!(code.as_deref(), Some("Price"));
}

#[tokio::test]
async fn test_default_threshold_comes_from_settings() {
    let (embedding, proposer) = price_engine_fakes();
    let engine = TestEngine::with_fakes(embedding, proposer).await;
    let seeded = completed_price_generation(&engine).await;

    db::settings::set_apply_threshold(&engine.db, 0.84).await.unwrap();

    let report = engine
        .orchestrator
        .apply_codeframe(seeded.generation_id, None, false)
        .await
        .unwrap();
    assert_eq!(report.threshold, 0.84);
    assert_eq!(report.assigned, 2);
}

#[tokio::test]
async fn test_stale_embedding_left_pending() {
    let (embedding, proposer) = price_engine_fakes();
    let engine = TestEngine::with_fakes(embedding, proposer).await;
    let seeded = completed_price_generation(&engine).await;

    sqlx::query("UPDATE answers SET answer_text = 'cheap price, really' WHERE id = ?")
        .bind(seeded.exact_id)
        .execute(&engine.db)
        .await
        .unwrap();

    let report = engine
        .orchestrator
        .apply_codeframe(seeded.generation_id, Some(0.9), false)
        .await
        .unwrap();
    assert_eq!(report.total_answers, 10);
    assert_eq!(report.assigned, 0);
    assert_eq!(report.pending, 10);
}

#[tokio::test]
async fn test_threshold_out_of_range_rejected() {
    let (embedding, proposer) = price_engine_fakes();
    let engine = TestEngine::with_fakes(embedding, proposer).await;
    let seeded = completed_price_generation(&engine).await;

    for threshold in [1.5, -0.1] {
        let err = engine
            .orchestrator
            .apply_codeframe(seeded.generation_id, Some(threshold), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "got {:?}", err);
    }

    let (code, _) = answer_row(&engine.db, seeded.exact_id).await;
    assert!(code.is_none());
}

#[tokio::test]
async fn test_apply_while_processing_conflicts() {
    let engine = TestEngine::with_fakes(
        FakeEmbedding::new(),
        FakeProposer::new().delayed(Duration::from_secs(2)),
    )
    .await;
    let category_id = seed_category(&engine.db, "Still running").await;
    helpers::seed_numbered(&engine.db, category_id, 10).await;

    let handle = engine
        .orchestrator
        .start_generation(StartRequest {
            category_id,
            answer_ids: None,
            config: GenerationConfig::default(),
            created_by: None,
        })
        .await
        .unwrap();

    let err = engine
        .orchestrator
        .apply_codeframe(handle.generation_id, Some(0.9), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {:?}", err);

    engine
        .orchestrator
        .cancel_generation(handle.generation_id)
        .await
        .unwrap();
}
