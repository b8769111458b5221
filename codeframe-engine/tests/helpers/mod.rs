//! Test helper utilities
//!
//! Shared setup for codeframe-engine integration tests: temporary
//! databases, seed data and in-process collaborators.
#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

pub use db_utils::{answer_row, create_test_db, numbered_answers, seed_answers, seed_category, seed_numbered};
pub use fakes::{theme, FakeClustering, FakeEmbedding, FakeMece, FakeProposer, DEFAULT_VECTOR};

use codeframe_common::events::EventBus;
use codeframe_engine::models::{GenerationStatus, GenerationStatusReport};
use codeframe_engine::services::collaborators::MeceValidator;
use codeframe_engine::services::{Collaborators, GenerationOrchestrator, JobSettings, OrchestratorSettings};
use codeframe_engine::{build_router, AppState};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Orchestrator wired to fakes over a temporary database
///
/// Keep the struct alive for the whole test; dropping it removes the
/// database directory.
pub struct TestEngine {
    pub dir: TempDir,
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub embedding: Arc<FakeEmbedding>,
    pub clustering: Arc<FakeClustering>,
    pub proposer: Arc<FakeProposer>,
    pub mece: Arc<FakeMece>,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_fakes(FakeEmbedding::new(), FakeProposer::new()).await
    }

    pub async fn with_fakes(embedding: FakeEmbedding, proposer: FakeProposer) -> Self {
        let (dir, db) = create_test_db().await;
        Self::over_database(dir, db, embedding, proposer)
    }

    /// Build on an existing database (used to simulate a restart)
    pub fn over_database(dir: TempDir, db: SqlitePool, embedding: FakeEmbedding, proposer: FakeProposer) -> Self {
        let embedding = Arc::new(embedding);
        let clustering = Arc::new(FakeClustering::new());
        let proposer = Arc::new(proposer);
        let mece = Arc::new(FakeMece::new());
        let event_bus = EventBus::new(100);

        let collaborators = Collaborators {
            embedding: embedding.clone(),
            clustering: clustering.clone(),
            proposer: proposer.clone(),
            mece: Some(mece.clone() as Arc<dyn MeceValidator>),
        };

        let orchestrator = Arc::new(GenerationOrchestrator::new(
            db.clone(),
            event_bus.clone(),
            collaborators,
            fast_settings(),
        ));

        Self {
            dir,
            db,
            event_bus,
            orchestrator,
            embedding,
            clustering,
            proposer,
            mece,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.event_bus.clone(), Arc::clone(&self.orchestrator))
    }

    pub fn router(&self) -> axum::Router {
        build_router(self.app_state())
    }

    /// Poll until the generation leaves `processing`
    pub async fn wait_for_terminal(&self, generation_id: Uuid) -> GenerationStatusReport {
        for _ in 0..400 {
            let report = self
                .orchestrator
                .generation_status(generation_id)
                .await
                .expect("status lookup failed");
            if report.status != GenerationStatus::Processing {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("Generation {} did not finish within 10s", generation_id);
    }
}

/// Millisecond backoff so retry paths finish quickly
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        jobs: JobSettings {
            workers: 2,
            max_attempts: 2,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            ..JobSettings::default()
        },
        ..OrchestratorSettings::default()
    }
}
