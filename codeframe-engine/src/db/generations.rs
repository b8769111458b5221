//! Generation record persistence

use chrono::Utc;
use codeframe_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{from_json, parse_enum, parse_optional_timestamp, parse_timestamp, parse_uuid, to_json};
use crate::models::{Generation, GenerationStatus, MeceIssue};

const GENERATION_COLUMNS: &str = r#"
    id, category_id, n_answers, n_clusters, noise_count, status, config,
    embedding_model, mece_score, mece_issues, processing_time_ms, error_message,
    created_by, created_at, completed_at, applied_at
"#;

/// Insert a new generation
///
/// Fails with `Error::Conflict` when the category already has a
/// processing generation (category lease).
pub async fn insert_generation(conn: &mut SqliteConnection, generation: &Generation) -> Result<()> {
    let config = to_json(&generation.config, "config")?;
    let mece_issues = to_json(&generation.mece_issues, "mece_issues")?;

    let result = sqlx::query(
        r#"
        INSERT INTO generations (
            id, category_id, n_answers, n_clusters, noise_count, status, config,
            embedding_model, mece_score, mece_issues, processing_time_ms, error_message,
            created_by, created_at, completed_at, applied_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(generation.id.to_string())
    .bind(generation.category_id)
    .bind(generation.n_answers as i64)
    .bind(generation.n_clusters as i64)
    .bind(generation.noise_count as i64)
    .bind(generation.status.as_str())
    .bind(config)
    .bind(&generation.embedding_model)
    .bind(generation.mece_score)
    .bind(mece_issues)
    .bind(generation.processing_time_ms)
    .bind(&generation.error_message)
    .bind(&generation.created_by)
    .bind(generation.created_at.to_rfc3339())
    .bind(generation.completed_at.map(|dt| dt.to_rfc3339()))
    .bind(generation.applied_at.map(|dt| dt.to_rfc3339()))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(Error::Conflict(
            format!(
                "A generation is already processing for category {}",
                generation.category_id
            ),
        )),
        Err(e) => Err(Error::Database(e)),
    }
}

/// Load generation by id
pub async fn load_generation(pool: &SqlitePool, generation_id: Uuid) -> Result<Option<Generation>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM generations WHERE id = ?",
        GENERATION_COLUMNS
    ))
    .bind(generation_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| generation_from_row(&row)).transpose()
}

/// Generations of a category, newest first
pub async fn list_generations(pool: &SqlitePool, category_id: i64) -> Result<Vec<Generation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM generations WHERE category_id = ? ORDER BY created_at DESC",
        GENERATION_COLUMNS
    ))
    .bind(category_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(generation_from_row).collect()
}

/// Generations still holding their category lease
pub async fn load_processing_generations(pool: &SqlitePool) -> Result<Vec<Generation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM generations WHERE status = 'processing' ORDER BY created_at",
        GENERATION_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(generation_from_row).collect()
}

/// Check if a category already has a processing generation
pub async fn has_processing_generation(pool: &SqlitePool, category_id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM generations WHERE category_id = ? AND status = 'processing'",
    )
    .bind(category_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Current status (None if the generation does not exist)
pub async fn load_status(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
) -> Result<Option<GenerationStatus>> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM generations WHERE id = ?")
        .bind(generation_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    status.map(|s| parse_enum(&s)).transpose()
}

/// PROCESSING → COMPLETED with MECE results
///
/// Returns false if the generation was no longer processing.
pub async fn mark_completed(
    pool: &SqlitePool,
    generation_id: Uuid,
    mece_score: Option<f64>,
    mece_issues: &[MeceIssue],
    processing_time_ms: i64,
) -> Result<bool> {
    let issues = to_json(&mece_issues, "mece_issues")?;

    let result = sqlx::query(
        r#"
        UPDATE generations
        SET status = 'completed',
            mece_score = ?,
            mece_issues = ?,
            completed_at = ?,
            processing_time_ms = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(mece_score)
    .bind(issues)
    .bind(Utc::now().to_rfc3339())
    .bind(processing_time_ms)
    .bind(generation_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// PROCESSING → FAILED
///
/// Returns false if the generation was no longer processing.
pub async fn mark_failed(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    message: &str,
    processing_time_ms: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE generations
        SET status = 'failed',
            error_message = ?,
            completed_at = ?,
            processing_time_ms = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(processing_time_ms)
    .bind(generation_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// COMPLETED/APPLIED → APPLIED
pub async fn mark_applied(conn: &mut SqliteConnection, generation_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE generations
        SET status = 'applied', applied_at = ?
        WHERE id = ? AND status IN ('completed', 'applied')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(generation_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn generation_from_row(row: &SqliteRow) -> Result<Generation> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let config: String = row.get("config");
    let mece_issues: String = row.get("mece_issues");
    let created_at: String = row.get("created_at");

    Ok(Generation {
        id: parse_uuid(&id, "id")?,
        category_id: row.get("category_id"),
        n_answers: row.get::<i64, _>("n_answers") as usize,
        n_clusters: row.get::<i64, _>("n_clusters") as usize,
        noise_count: row.get::<i64, _>("noise_count") as usize,
        status: parse_enum(&status)?,
        config: from_json(&config, "config")?,
        embedding_model: row.get("embedding_model"),
        mece_score: row.get("mece_score"),
        mece_issues: from_json(&mece_issues, "mece_issues")?,
        processing_time_ms: row.get("processing_time_ms"),
        error_message: row.get("error_message"),
        created_by: row.get("created_by"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        completed_at: parse_optional_timestamp(row.get("completed_at"), "completed_at")?,
        applied_at: parse_optional_timestamp(row.get("applied_at"), "applied_at")?,
    })
}
