//! Job orchestrator
//!
//! Runs a generation's cluster jobs in a background task with a bounded
//! worker pool (`buffer_unordered`). Each job makes one hierarchy proposal
//! call and writes the proposed nodes together with its own completion in
//! one transaction. Failed attempts are retried with exponential backoff;
//! a job that exhausts its attempts is marked failed without affecting its
//! siblings. Once every job is terminal the generation is finalized.
//!
//! # Cancellation
//! Each running generation owns a `CancellationToken`. Cancelling stops
//! new attempts, interrupts backoff sleeps, and removes the generation's
//! partial output; node writes re-check the generation status inside their
//! transaction so a late proposal never lands on a cancelled generation.

use chrono::Utc;
use codeframe_common::events::{CodeframeEvent, EventBus};
use codeframe_common::{Error, Result};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::models::{ClusterJob, ConfidenceBand, Generation, GenerationStatus, HierarchyNode, NodeType};
use crate::services::collaborators::{
    HierarchyProposer, MeceNode, MeceReport, MeceRequest, MeceValidator, ProposalRequest,
    ProposalResponse,
};
use crate::services::embedding_cache::EmbeddingCache;
use crate::utils::db_retry::retry_on_lock;

/// Error message recorded on jobs and generations stopped by a reviewer
pub const CANCELLED_MESSAGE: &str = "Cancelled";

/// Worker pool and retry tuning
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Concurrent jobs per generation
    pub workers: usize,
    /// Attempts per job, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub mece_overlap_threshold: f32,
    pub mece_gap_threshold: f32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            mece_overlap_threshold: 0.85,
            mece_gap_threshold: 0.5,
        }
    }
}

impl JobSettings {
    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug)]
enum JobOutcome {
    Completed { cluster_id: i64, nodes_created: usize },
    Failed { cluster_id: i64, attempts: u32, error: String },
    Cancelled,
}

pub struct JobOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    proposer: Arc<dyn HierarchyProposer>,
    mece: Option<Arc<dyn MeceValidator>>,
    embedding_cache: Arc<EmbeddingCache>,
    settings: JobSettings,
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl JobOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        proposer: Arc<dyn HierarchyProposer>,
        mece: Option<Arc<dyn MeceValidator>>,
        embedding_cache: Arc<EmbeddingCache>,
        settings: JobSettings,
    ) -> Self {
        Self {
            db,
            event_bus,
            proposer,
            mece,
            embedding_cache,
            settings,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Generations with a live worker task
    pub async fn active_generations(&self) -> usize {
        self.tokens.lock().await.len()
    }

    /// Start the background task for a generation's pending jobs
    pub async fn dispatch(self: &Arc<Self>, generation: Generation, jobs: Vec<ClusterJob>) -> JoinHandle<()> {
        let token = CancellationToken::new();
        self.tokens.lock().await.insert(generation.id, token.clone());

        info!(
            generation_id = %generation.id,
            jobs = jobs.len(),
            workers = self.settings.workers,
            "Dispatching cluster jobs"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let generation_id = generation.id;
            Arc::clone(&this).run_generation(generation, jobs, token).await;
            this.tokens.lock().await.remove(&generation_id);
        })
    }

    /// Re-dispatch work left behind by a previous process
    pub async fn resume_pending(self: &Arc<Self>) -> Result<usize> {
        let generations = db::generations::load_processing_generations(&self.db).await?;
        let count = generations.len();

        for generation in generations {
            let requeued = db::cluster_jobs::requeue_running(&self.db, generation.id).await?;
            let jobs = db::cluster_jobs::load_pending_jobs(&self.db, generation.id).await?;
            info!(
                generation_id = %generation.id,
                pending = jobs.len(),
                requeued,
                "Resuming generation"
            );
            self.dispatch(generation, jobs).await;
        }

        Ok(count)
    }

    /// Stop a processing generation and release its category lease
    pub async fn cancel(&self, generation: &Generation) -> Result<()> {
        if let Some(token) = self.tokens.lock().await.get(&generation.id) {
            token.cancel();
        }

        let processing_time_ms = elapsed_ms(generation);
        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db).await?;

        retry_on_lock("cancel generation", max_wait_ms, || async move {
            let mut tx = self.db.begin().await?;
            let jobs_failed =
                db::cluster_jobs::fail_pending(&mut tx, generation.id, CANCELLED_MESSAGE).await?;
            let nodes_removed = db::hierarchy::delete_generation_nodes(&mut tx, generation.id).await?;

            if !db::generations::mark_failed(&mut tx, generation.id, CANCELLED_MESSAGE, processing_time_ms)
                .await?
            {
                return Err(Error::Conflict(format!(
                    "Generation {} is no longer processing",
                    generation.id
                )));
            }

            tx.commit().await?;
            info!(
                generation_id = %generation.id,
                jobs_failed,
                nodes_removed,
                "Generation cancelled"
            );
            Ok(())
        })
        .await?;

        self.event_bus.emit_lossy(CodeframeEvent::GenerationCancelled {
            generation_id: generation.id,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    async fn run_generation(self: Arc<Self>, generation: Generation, jobs: Vec<ClusterJob>, token: CancellationToken) {
        let generation_id = generation.id;

        let counts = match self.job_counts(generation_id).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(generation_id = %generation_id, "Failed to count cluster jobs: {}", e);
                self.abandon(&generation, &format!("Failed to count cluster jobs: {}", e))
                    .await;
                return;
            }
        };
        let total = counts.total();
        let finished = Arc::new(AtomicUsize::new(counts.completed + counts.failed));

        let mut outcomes = stream::iter(jobs)
            .map(|job| {
                let this = Arc::clone(&self);
                let token = token.clone();
                async move { this.run_job(job, &token).await }
            })
            .buffer_unordered(self.settings.workers.max(1));

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                JobOutcome::Completed {
                    cluster_id,
                    nodes_created,
                } => {
                    let finished = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    self.event_bus.emit_lossy(CodeframeEvent::ClusterJobCompleted {
                        generation_id,
                        cluster_id,
                        nodes_created,
                        finished,
                        total,
                        timestamp: Utc::now(),
                    });
                }
                JobOutcome::Failed {
                    cluster_id,
                    attempts,
                    error,
                } => {
                    finished.fetch_add(1, Ordering::SeqCst);
                    self.event_bus.emit_lossy(CodeframeEvent::ClusterJobFailed {
                        generation_id,
                        cluster_id,
                        attempts,
                        error,
                        timestamp: Utc::now(),
                    });
                }
                JobOutcome::Cancelled => {}
            }
        }
        drop(outcomes);

        if token.is_cancelled() {
            debug!(generation_id = %generation_id, "Worker task stopped after cancellation");
            return;
        }

        if let Err(e) = self.finalize(&generation).await {
            error!(generation_id = %generation_id, "Failed to finalize generation: {}", e);
            self.abandon(&generation, &format!("Finalize failed: {}", e)).await;
        }
    }

    async fn job_counts(&self, generation_id: Uuid) -> Result<db::cluster_jobs::JobCounts> {
        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db).await?;
        retry_on_lock("count cluster jobs", max_wait_ms, || {
            db::cluster_jobs::job_counts(&self.db, generation_id)
        })
        .await
    }

    /// Fail a generation that can no longer finish, releasing its category lease
    ///
    /// Left-over jobs are failed afterwards on a best-effort basis.
    async fn abandon(&self, generation: &Generation, reason: &str) {
        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db)
            .await
            .unwrap_or(db::settings::DEFAULT_MAX_LOCK_WAIT_MS);
        let processing_time_ms = elapsed_ms(generation);

        let released = retry_on_lock("abandon generation", max_wait_ms, || async move {
            let mut tx = self.db.begin().await?;
            let updated = db::generations::mark_failed(&mut tx, generation.id, reason, processing_time_ms).await?;
            tx.commit().await?;
            Ok(updated)
        })
        .await;

        match released {
            Ok(true) => {
                error!(generation_id = %generation.id, "Generation failed: {}", reason);
                self.event_bus.emit_lossy(CodeframeEvent::GenerationFailed {
                    generation_id: Some(generation.id),
                    category_id: generation.category_id,
                    error: reason.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Ok(false) => {
                debug!(generation_id = %generation.id, "Generation already left processing");
                return;
            }
            Err(e) => {
                error!(generation_id = %generation.id, "Failed to release generation: {}", e);
                return;
            }
        }

        let leftover = retry_on_lock("fail leftover jobs", max_wait_ms, || async move {
            let mut tx = self.db.begin().await?;
            let failed = db::cluster_jobs::fail_pending(&mut tx, generation.id, reason).await?;
            tx.commit().await?;
            Ok(failed)
        })
        .await;
        if let Err(e) = leftover {
            warn!(generation_id = %generation.id, "Failed to close leftover jobs: {}", e);
        }
    }

    async fn run_job(&self, job: ClusterJob, token: &CancellationToken) -> JobOutcome {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = job.attempts;
        let mut last_error = job
            .last_error
            .clone()
            .unwrap_or_else(|| "Retries exhausted".to_string());

        while attempt < max_attempts {
            attempt += 1;

            if token.is_cancelled() {
                return JobOutcome::Cancelled;
            }

            let result = match self.mark_running(&job, attempt).await {
                Ok(true) => self.attempt_job(&job).await,
                Ok(false) => return JobOutcome::Cancelled,
                Err(e) => Err(e),
            };

            match result {
                Ok(Some(nodes_created)) => {
                    debug!(
                        generation_id = %job.generation_id,
                        cluster_id = job.cluster_id,
                        attempt,
                        nodes_created,
                        "Cluster job completed"
                    );
                    return JobOutcome::Completed {
                        cluster_id: job.cluster_id,
                        nodes_created,
                    };
                }
                Ok(None) => return JobOutcome::Cancelled,
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        generation_id = %job.generation_id,
                        cluster_id = job.cluster_id,
                        attempt,
                        max_attempts,
                        "Cluster job attempt failed: {}",
                        last_error
                    );

                    if attempt >= max_attempts {
                        break;
                    }

                    if let Err(e) = db::cluster_jobs::record_attempt_error(&self.db, job.id, &last_error).await {
                        warn!(job_id = %job.id, "Failed to record attempt error: {}", e);
                    }

                    tokio::select! {
                        _ = token.cancelled() => return JobOutcome::Cancelled,
                        _ = tokio::time::sleep(self.settings.backoff_for(attempt)) => {}
                    }
                }
            }
        }

        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db)
            .await
            .unwrap_or(db::settings::DEFAULT_MAX_LOCK_WAIT_MS);
        let marked = retry_on_lock("mark job failed", max_wait_ms, || {
            db::cluster_jobs::mark_failed(&self.db, job.id, &last_error)
        })
        .await;

        match marked {
            Ok(true) => {
                error!(
                    generation_id = %job.generation_id,
                    cluster_id = job.cluster_id,
                    attempts = attempt,
                    "Cluster job failed: {}",
                    last_error
                );
                JobOutcome::Failed {
                    cluster_id: job.cluster_id,
                    attempts: attempt,
                    error: last_error,
                }
            }
            Ok(false) => JobOutcome::Cancelled,
            Err(e) => {
                // Job row stays non-terminal; finalize then fails the generation
                error!(job_id = %job.id, "Failed to mark job failed: {}", e);
                JobOutcome::Failed {
                    cluster_id: job.cluster_id,
                    attempts: attempt,
                    error: last_error,
                }
            }
        }
    }

    async fn mark_running(&self, job: &ClusterJob, attempt: u32) -> Result<bool> {
        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db).await?;
        retry_on_lock("mark job running", max_wait_ms, || {
            db::cluster_jobs::mark_running(&self.db, job.id, attempt)
        })
        .await
    }

    /// One proposal call and node write; None if the generation stopped processing
    async fn attempt_job(&self, job: &ClusterJob) -> Result<Option<usize>> {
        let request = ProposalRequest {
            generation_id: job.generation_id,
            cluster_id: job.cluster_id,
            texts: job.answers.clone(),
            category_name: job.category.name.clone(),
            category_description: job.category.description.clone(),
            target_language: job.config.target_language.clone(),
            existing_codes: job.config.existing_codes.clone(),
            hierarchy_preference: job.config.hierarchy_preference,
            coding_mode: job.config.coding_mode,
        };

        let response = self.proposer.propose(&request).await?;
        let nodes = build_nodes(job, &response)?;

        let max_wait_ms = db::settings::get_max_lock_wait_ms(&self.db).await?;
        retry_on_lock("cluster node write", max_wait_ms, || self.write_job_nodes(job, &nodes)).await
    }

    async fn write_job_nodes(&self, job: &ClusterJob, nodes: &[HierarchyNode]) -> Result<Option<usize>> {
        let mut tx = self.db.begin().await?;

        if db::generations::load_status(&mut tx, job.generation_id).await? != Some(GenerationStatus::Processing) {
            return Ok(None);
        }

        db::hierarchy::replace_cluster_nodes(&mut tx, job.generation_id, job.cluster_id, nodes).await?;
        if !db::cluster_jobs::mark_completed(&mut tx, job.id).await? {
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(nodes.len()))
    }

    /// Close out a generation once every job is terminal
    async fn finalize(&self, generation: &Generation) -> Result<()> {
        let counts = self.job_counts(generation.id).await?;
        if !counts.all_terminal() {
            return Err(Error::Internal(format!(
                "{} cluster jobs were left unfinished",
                counts.pending()
            )));
        }

        if let Err(e) = self
            .embedding_cache
            .ensure_node_embeddings(generation.id, &generation.embedding_model)
            .await
        {
            warn!(generation_id = %generation.id, "Node embedding failed during finalize: {}", e);
        }

        let (mece_score, mece_issues) = match self.validate_mece(generation.id).await {
            Ok(Some(report)) => (Some(report.score), report.issues),
            Ok(None) => (None, Vec::new()),
            Err(e) => {
                warn!(generation_id = %generation.id, "MECE validation failed: {}", e);
                (None, Vec::new())
            }
        };

        let processing_time_ms = elapsed_ms(generation);
        let completed = db::generations::mark_completed(
            &self.db,
            generation.id,
            mece_score,
            &mece_issues,
            processing_time_ms,
        )
        .await?;

        if !completed {
            debug!(generation_id = %generation.id, "Generation left processing before finalize");
            return Ok(());
        }

        info!(
            generation_id = %generation.id,
            n_completed = counts.completed,
            n_failed = counts.failed,
            elapsed_ms = processing_time_ms,
            mece_score,
            "Generation completed"
        );

        self.event_bus.emit_lossy(CodeframeEvent::GenerationCompleted {
            generation_id: generation.id,
            n_completed: counts.completed,
            n_failed: counts.failed,
            mece_score,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    async fn validate_mece(&self, generation_id: Uuid) -> Result<Option<MeceReport>> {
        let Some(validator) = &self.mece else {
            return Ok(None);
        };

        let nodes: Vec<MeceNode> = db::hierarchy::load_nodes(&self.db, generation_id)
            .await?
            .into_iter()
            .filter_map(|n| {
                n.embedding.map(|embedding| MeceNode {
                    id: n.id,
                    parent_id: n.parent_id,
                    node_type: n.node_type,
                    name: n.name,
                    description: n.description,
                    embedding,
                })
            })
            .collect();

        if nodes.is_empty() {
            return Ok(None);
        }

        let request = MeceRequest {
            nodes,
            overlap_threshold: db::settings::get_mece_overlap_threshold(
                &self.db,
                self.settings.mece_overlap_threshold,
            )
            .await?,
            gap_threshold: db::settings::get_mece_gap_threshold(&self.db, self.settings.mece_gap_threshold)
                .await?,
        };

        validator.validate(&request).await.map(Some)
    }
}

fn elapsed_ms(generation: &Generation) -> i64 {
    (Utc::now() - generation.created_at).num_milliseconds().max(0)
}

/// Turn a proposal into nodes: themes at level 0, their codes at level 1
fn build_nodes(job: &ClusterJob, response: &ProposalResponse) -> Result<Vec<HierarchyNode>> {
    let mut nodes = Vec::new();

    for proposed in &response.themes {
        let name = proposed.name.trim();
        if name.is_empty() {
            warn!(cluster_id = job.cluster_id, "Skipping unnamed theme in proposal");
            continue;
        }

        let mut theme = HierarchyNode::new_theme(job.generation_id, name.to_string());
        theme.description = proposed.description.clone();
        theme.confidence = ConfidenceBand::from_score(proposed.confidence.unwrap_or(job.confidence));
        theme.cluster_id = Some(job.cluster_id);
        theme.cluster_size = Some(job.cluster_size as i64);
        let theme_id = theme.id;
        nodes.push(theme);

        for proposed_code in &proposed.codes {
            let code_name = proposed_code.name.trim();
            if code_name.is_empty() {
                continue;
            }

            let mut code = HierarchyNode::new_code(job.generation_id, theme_id, code_name.to_string());
            code.description = proposed_code.description.clone();
            code.confidence =
                ConfidenceBand::from_score(proposed_code.confidence.unwrap_or(job.confidence));
            code.cluster_id = Some(job.cluster_id);
            code.brand_variants = proposed_code.brand_variants.clone();
            code.example_texts = proposed_code.example_texts.clone();
            nodes.push(code);
        }
    }

    if !nodes.iter().any(|n| n.node_type == NodeType::Theme) {
        return Err(Error::Upstream {
            service: "hierarchy".to_string(),
            message: format!("Proposal for cluster {} contained no themes", job.cluster_id),
        });
    }

    Ok(nodes)
}
