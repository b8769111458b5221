//! Cluster job persistence
//!
//! Jobs are the durable queue behind the job orchestrator: a restarted
//! process resumes whatever is still queued or running.

use chrono::Utc;
use codeframe_common::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{from_json, parse_enum, parse_optional_timestamp, parse_timestamp, parse_uuid, to_json};
use crate::models::{ClusterJob, JobStatus};

const JOB_COLUMNS: &str = r#"
    id, generation_id, cluster_id, answers, category, config, cluster_size,
    confidence, status, attempts, last_error, created_at, finished_at
"#;

/// Job counts for one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed
    }

    pub fn pending(&self) -> usize {
        self.queued + self.running
    }

    pub fn all_terminal(&self) -> bool {
        self.pending() == 0
    }
}

/// Insert jobs (within the generation's creating transaction)
pub async fn insert_jobs(conn: &mut SqliteConnection, jobs: &[ClusterJob]) -> Result<()> {
    for job in jobs {
        let answers = to_json(&job.answers, "answers")?;
        let category = to_json(&job.category, "category")?;
        let config = to_json(&job.config, "config")?;

        sqlx::query(
            r#"
            INSERT INTO cluster_jobs (
                id, generation_id, cluster_id, answers, category, config, cluster_size,
                confidence, status, attempts, last_error, created_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.generation_id.to_string())
        .bind(job.cluster_id)
        .bind(answers)
        .bind(category)
        .bind(config)
        .bind(job.cluster_size as i64)
        .bind(job.confidence)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(&job.last_error)
        .bind(job.created_at.to_rfc3339())
        .bind(job.finished_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// All jobs of a generation ordered by cluster id
///
/// Inspection helper for operators and integration tests; the worker path
/// reads only pending jobs.
pub async fn load_jobs(pool: &SqlitePool, generation_id: Uuid) -> Result<Vec<ClusterJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM cluster_jobs WHERE generation_id = ? ORDER BY cluster_id",
        JOB_COLUMNS
    ))
    .bind(generation_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Jobs not yet terminal
pub async fn load_pending_jobs(pool: &SqlitePool, generation_id: Uuid) -> Result<Vec<ClusterJob>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM cluster_jobs WHERE generation_id = ? AND status IN ('queued', 'running') ORDER BY cluster_id",
        JOB_COLUMNS
    ))
    .bind(generation_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Count jobs by status
pub async fn job_counts(pool: &SqlitePool, generation_id: Uuid) -> Result<JobCounts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM cluster_jobs WHERE generation_id = ? GROUP BY status",
    )
    .bind(generation_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut counts = JobCounts::default();
    for (status, count) in rows {
        let count = count as usize;
        match parse_enum::<JobStatus>(&status)? {
            JobStatus::Queued => counts.queued = count,
            JobStatus::Running => counts.running = count,
            JobStatus::Completed => counts.completed = count,
            JobStatus::Failed => counts.failed = count,
        }
    }

    Ok(counts)
}

/// Record the start of an attempt; false if the job is already terminal
pub async fn mark_running(pool: &SqlitePool, job_id: Uuid, attempt: u32) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE cluster_jobs SET status = 'running', attempts = ? WHERE id = ? AND status IN ('queued', 'running')",
    )
    .bind(attempt as i64)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a failed attempt that will be retried
pub async fn record_attempt_error(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<()> {
    sqlx::query("UPDATE cluster_jobs SET last_error = ? WHERE id = ? AND status = 'running'")
        .bind(error)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// RUNNING → COMPLETED (same transaction as the node write)
pub async fn mark_completed(conn: &mut SqliteConnection, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE cluster_jobs SET status = 'completed', last_error = NULL, finished_at = ? WHERE id = ? AND status = 'running'",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// RUNNING/QUEUED → FAILED after retries are exhausted
pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE cluster_jobs SET status = 'failed', last_error = ?, finished_at = ? WHERE id = ? AND status IN ('queued', 'running')",
    )
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fail every non-terminal job of a generation (cancellation)
pub async fn fail_pending(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    reason: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE cluster_jobs SET status = 'failed', last_error = ?, finished_at = ? WHERE generation_id = ? AND status IN ('queued', 'running')",
    )
    .bind(reason)
    .bind(Utc::now().to_rfc3339())
    .bind(generation_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// RUNNING → QUEUED for jobs orphaned by a previous process
pub async fn requeue_running(pool: &SqlitePool, generation_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE cluster_jobs SET status = 'queued' WHERE generation_id = ? AND status = 'running'",
    )
    .bind(generation_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

fn job_from_row(row: &SqliteRow) -> Result<ClusterJob> {
    let id: String = row.get("id");
    let generation_id: String = row.get("generation_id");
    let answers: String = row.get("answers");
    let category: String = row.get("category");
    let config: String = row.get("config");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(ClusterJob {
        id: parse_uuid(&id, "id")?,
        generation_id: parse_uuid(&generation_id, "generation_id")?,
        cluster_id: row.get("cluster_id"),
        answers: from_json(&answers, "answers")?,
        category: from_json(&category, "category")?,
        config: from_json(&config, "config")?,
        cluster_size: row.get::<i64, _>("cluster_size") as usize,
        confidence: row.get("confidence"),
        status: parse_enum(&status)?,
        attempts: row.get::<i64, _>("attempts") as u32,
        last_error: row.get("last_error"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        finished_at: parse_optional_timestamp(row.get("finished_at"), "finished_at")?,
    })
}
