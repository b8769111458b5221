//! Generation orchestrator
//!
//! Entry point for every codeframe operation. Starting a generation
//! validates the answer selection, embeds and clusters the answers inline,
//! creates the generation together with one job per cluster, and hands the
//! jobs to the [`JobOrchestrator`]. Everything after that (status, hierarchy
//! review, apply, cancel) reads or edits what the jobs produced.

use chrono::Utc;
use codeframe_common::events::{CodeframeEvent, EventBus};
use codeframe_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::generation::progress_percentage;
use crate::models::{
    AnswerText, Category, ClusterJob, CodingMode, EditOutcome, Generation, GenerationConfig,
    GenerationHandle, GenerationStatus, GenerationStatusReport, GenerationSummary, HierarchyEdit,
    HierarchyEditRecord, TreeNode,
};
use crate::services::apply_engine::{ApplyEngine, ApplyReport};
use crate::services::collaborators::{
    ClusteringAnswer, ClusteringProvider, ClusteringRequest, EmbeddingProvider, HierarchyProposer,
    MeceValidator,
};
use crate::services::embedding_cache::EmbeddingCache;
use crate::services::hierarchy_store::HierarchyStore;
use crate::services::job_orchestrator::{JobOrchestrator, JobSettings};

/// External services the engine depends on
#[derive(Clone)]
pub struct Collaborators {
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub clustering: Arc<dyn ClusteringProvider>,
    pub proposer: Arc<dyn HierarchyProposer>,
    /// Validation is skipped when None
    pub mece: Option<Arc<dyn MeceValidator>>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub min_answers: usize,
    pub seconds_per_cluster: u64,
    pub default_embedding_model: String,
    pub jobs: JobSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_answers: 10,
            seconds_per_cluster: 5,
            default_embedding_model: "text-embedding-3-small".to_string(),
            jobs: JobSettings::default(),
        }
    }
}

/// Start request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub category_id: i64,
    /// Explicit selection; all uncoded answers of the category when None
    #[serde(default)]
    pub answer_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub config: GenerationConfig,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Cluster ready to become a job
struct PlannedCluster {
    cluster_id: i64,
    answers: Vec<AnswerText>,
    size: usize,
    confidence: f64,
}

struct ClusterPlan {
    clusters: Vec<PlannedCluster>,
    noise_count: usize,
}

pub struct GenerationOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    embedding_cache: Arc<EmbeddingCache>,
    clustering: Arc<dyn ClusteringProvider>,
    hierarchy: HierarchyStore,
    jobs: Arc<JobOrchestrator>,
    apply_engine: ApplyEngine,
    settings: OrchestratorSettings,
}

impl GenerationOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        collaborators: Collaborators,
        settings: OrchestratorSettings,
    ) -> Self {
        let embedding_cache = Arc::new(EmbeddingCache::new(db.clone(), collaborators.embedding));
        let jobs = Arc::new(JobOrchestrator::new(
            db.clone(),
            event_bus.clone(),
            collaborators.proposer,
            collaborators.mece,
            Arc::clone(&embedding_cache),
            settings.jobs.clone(),
        ));

        Self {
            hierarchy: HierarchyStore::new(db.clone()),
            apply_engine: ApplyEngine::new(db.clone(), Arc::clone(&embedding_cache)),
            clustering: collaborators.clustering,
            db,
            event_bus,
            embedding_cache,
            jobs,
            settings,
        }
    }

    /// Generations with a live worker task
    pub async fn active_generations(&self) -> usize {
        self.jobs.active_generations().await
    }

    /// Re-dispatch generations left processing by a previous run
    pub async fn resume_pending(&self) -> Result<usize> {
        self.jobs.resume_pending().await
    }

    /// Validate, embed, cluster, and enqueue one job per cluster
    pub async fn start_generation(&self, request: StartRequest) -> Result<GenerationHandle> {
        let StartRequest {
            category_id,
            answer_ids,
            config,
            created_by,
        } = request;

        config.validate().map_err(Error::InvalidInput)?;

        let category = db::answers::load_category(&self.db, category_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Category {} not found", category_id)))?;

        let answers = self.resolve_answers(category_id, answer_ids).await?;
        if answers.len() < self.settings.min_answers {
            return Err(Error::InsufficientAnswers {
                required: self.settings.min_answers,
                found: answers.len(),
            });
        }

        if db::generations::has_processing_generation(&self.db, category_id).await? {
            return Err(Error::Conflict(format!(
                "A generation is already processing for category {}",
                category_id
            )));
        }

        let model = config
            .embedding_model
            .clone()
            .unwrap_or_else(|| self.settings.default_embedding_model.clone());

        let plan = match self.plan_clusters(&answers, &config, &model).await {
            Ok(plan) => plan,
            Err(e) => {
                self.record_start_failure(category_id, &e);
                return Err(e);
            }
        };

        let generation = Generation::new(
            category_id,
            answers.len(),
            plan.clusters.len(),
            plan.noise_count,
            config,
            model,
            created_by,
        );

        let jobs: Vec<ClusterJob> = plan
            .clusters
            .into_iter()
            .map(|cluster| {
                ClusterJob::new(
                    generation.id,
                    cluster.cluster_id,
                    cluster.answers,
                    category.clone(),
                    generation.config.clone(),
                    cluster.size,
                    cluster.confidence,
                )
            })
            .collect();

        let mut tx = self.db.begin().await?;
        db::generations::insert_generation(&mut tx, &generation).await?;
        db::cluster_jobs::insert_jobs(&mut tx, &jobs).await?;
        tx.commit().await?;

        info!(
            generation_id = %generation.id,
            category_id,
            n_answers = generation.n_answers,
            n_clusters = generation.n_clusters,
            noise_count = generation.noise_count,
            coding_mode = ?generation.config.coding_mode,
            "Generation started"
        );

        self.event_bus.emit_lossy(CodeframeEvent::GenerationStarted {
            generation_id: generation.id,
            category_id,
            n_clusters: generation.n_clusters,
            n_answers: generation.n_answers,
            timestamp: Utc::now(),
        });

        let handle = GenerationHandle {
            generation_id: generation.id,
            status: generation.status,
            n_clusters: generation.n_clusters,
            n_answers: generation.n_answers,
            noise_count: generation.noise_count,
            estimated_time_seconds: generation.n_clusters as u64 * self.settings.seconds_per_cluster,
            status_url: generation.status_url(),
        };

        self.jobs.dispatch(generation, jobs).await;
        Ok(handle)
    }

    async fn resolve_answers(&self, category_id: i64, answer_ids: Option<Vec<i64>>) -> Result<Vec<AnswerText>> {
        let Some(ids) = answer_ids else {
            return db::answers::load_uncoded_answers(&self.db, category_id).await;
        };

        let unique: Vec<i64> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let answers = db::answers::load_answers_by_ids(&self.db, category_id, &unique).await?;

        if answers.len() != unique.len() {
            return Err(Error::InvalidInput(format!(
                "{} of {} answer ids do not belong to category {}",
                unique.len() - answers.len(),
                unique.len(),
                category_id
            )));
        }

        Ok(answers)
    }

    /// Brand mode: one synthetic cluster. Open-ended: embed then cluster.
    async fn plan_clusters(
        &self,
        answers: &[AnswerText],
        config: &GenerationConfig,
        model: &str,
    ) -> Result<ClusterPlan> {
        // Apply matches against cached answer vectors, so both modes embed
        let embeddings = self.embedding_cache.ensure_embeddings(answers, model).await?;

        if config.coding_mode == CodingMode::Brand {
            return Ok(ClusterPlan {
                clusters: vec![PlannedCluster {
                    cluster_id: 0,
                    answers: answers.to_vec(),
                    size: answers.len(),
                    confidence: 1.0,
                }],
                noise_count: 0,
            });
        }

        let request = ClusteringRequest {
            answer_ids: answers.iter().map(|a| a.id).collect(),
            answers: answers
                .iter()
                .map(|a| ClusteringAnswer {
                    id: a.id,
                    text: a.text.clone(),
                    language: a.language.clone(),
                    embedding: embeddings.vectors.get(&a.id).cloned().unwrap_or_default(),
                })
                .collect(),
            config: config.clustering,
        };

        let response = self.clustering.cluster(&request).await?;
        if response.clusters.is_empty() {
            return Err(Error::InvalidInput("Clustering produced no clusters".to_string()));
        }

        Ok(ClusterPlan {
            clusters: response
                .clusters
                .into_iter()
                .map(|(cluster_id, cluster)| PlannedCluster {
                    cluster_id,
                    size: cluster.size,
                    confidence: cluster.confidence,
                    answers: cluster.texts,
                })
                .collect(),
            noise_count: response.noise_count,
        })
    }

    /// Best-effort failure telemetry; never affects the response
    fn record_start_failure(&self, category_id: i64, error: &Error) {
        warn!(category_id, "Generation start failed: {}", error);
        self.event_bus.emit_lossy(CodeframeEvent::GenerationFailed {
            generation_id: None,
            category_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn generation_status(&self, generation_id: Uuid) -> Result<GenerationStatusReport> {
        let generation = self.load_generation(generation_id).await?;
        let counts = db::cluster_jobs::job_counts(&self.db, generation_id).await?;
        let (n_themes, n_codes) = db::hierarchy::count_nodes(&self.db, generation_id).await?;

        let finished = generation.status.is_applicable();

        Ok(GenerationStatusReport {
            generation_id,
            category_id: generation.category_id,
            status: generation.status,
            progress: progress_percentage(generation.status, n_themes, generation.n_clusters),
            n_clusters: generation.n_clusters,
            n_completed: counts.completed,
            n_failed: counts.failed,
            n_pending: counts.pending(),
            n_themes,
            n_codes,
            mece_score: generation.mece_score.filter(|_| finished),
            mece_issues: if finished { generation.mece_issues } else { Vec::new() },
            processing_time_ms: generation.processing_time_ms,
            error_message: generation.error_message,
            created_at: generation.created_at,
            completed_at: generation.completed_at,
        })
    }

    pub async fn fetch_hierarchy(&self, generation_id: Uuid) -> Result<Vec<TreeNode>> {
        self.load_generation(generation_id).await?;
        self.hierarchy.load_tree(generation_id).await
    }

    pub async fn edit_hierarchy(
        &self,
        generation_id: Uuid,
        edit: &HierarchyEdit,
        actor: Option<&str>,
    ) -> Result<EditOutcome> {
        let generation = self.load_generation(generation_id).await?;
        if generation.status == GenerationStatus::Failed {
            return Err(Error::Conflict(format!(
                "Generation {} has failed; its hierarchy cannot be edited",
                generation_id
            )));
        }

        let outcome = self.hierarchy.apply_edit(generation_id, edit, actor).await?;

        self.event_bus.emit_lossy(CodeframeEvent::HierarchyEdited {
            generation_id,
            node_id: outcome.node_id,
            action: outcome.action.as_str().to_string(),
            timestamp: Utc::now(),
        });

        Ok(outcome)
    }

    pub async fn node_history(&self, generation_id: Uuid, node_id: Uuid) -> Result<Vec<HierarchyEditRecord>> {
        self.load_generation(generation_id).await?;
        self.hierarchy.history(generation_id, node_id).await
    }

    /// Assign codes to answers; threshold defaults to the stored setting
    pub async fn apply_codeframe(
        &self,
        generation_id: Uuid,
        threshold: Option<f32>,
        overwrite_existing: bool,
    ) -> Result<ApplyReport> {
        let generation = self.load_generation(generation_id).await?;
        let threshold = match threshold {
            Some(threshold) => threshold,
            None => db::settings::get_apply_threshold(&self.db).await?,
        };

        let report = self
            .apply_engine
            .apply(&generation, threshold, overwrite_existing)
            .await?;

        self.event_bus.emit_lossy(CodeframeEvent::CodeframeApplied {
            generation_id,
            total_answers: report.total_answers,
            assigned: report.assigned,
            pending: report.pending,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Cancel a processing generation
    pub async fn cancel_generation(&self, generation_id: Uuid) -> Result<GenerationStatusReport> {
        let generation = self.load_generation(generation_id).await?;
        if generation.status != GenerationStatus::Processing {
            return Err(Error::Conflict(format!(
                "Generation {} is {}; only processing generations can be cancelled",
                generation_id,
                generation.status.as_str()
            )));
        }

        self.jobs.cancel(&generation).await?;
        self.generation_status(generation_id).await
    }

    /// Summaries for a category, newest first
    pub async fn list_generations(&self, category_id: i64) -> Result<Vec<GenerationSummary>> {
        let category: Option<Category> = db::answers::load_category(&self.db, category_id).await?;
        if category.is_none() {
            return Err(Error::NotFound(format!("Category {} not found", category_id)));
        }

        let generations = db::generations::list_generations(&self.db, category_id).await?;
        Ok(generations.iter().map(GenerationSummary::from).collect())
    }

    async fn load_generation(&self, generation_id: Uuid) -> Result<Generation> {
        db::generations::load_generation(&self.db, generation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Generation {} not found", generation_id)))
    }
}
