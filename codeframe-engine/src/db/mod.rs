//! Database access for the codeframe engine
//!
//! Shared tables (settings, categories, answers, answer_embeddings) are
//! created by `codeframe_common::db`; this module adds the engine tables.

pub mod answers;
pub mod cluster_jobs;
pub mod embeddings;
pub mod generations;
pub mod hierarchy;
pub mod settings;

use chrono::{DateTime, Utc};
use codeframe_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

/// Open the database and create shared + engine tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = codeframe_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create engine tables (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generations (
            id TEXT PRIMARY KEY,
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            n_answers INTEGER NOT NULL,
            n_clusters INTEGER NOT NULL,
            noise_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            config TEXT NOT NULL,
            embedding_model TEXT NOT NULL,
            mece_score REAL,
            mece_issues TEXT NOT NULL DEFAULT '[]',
            processing_time_ms INTEGER,
            error_message TEXT,
            created_by TEXT,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            applied_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Category lease: one processing generation per category
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_generations_category_lease
        ON generations(category_id) WHERE status = 'processing'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cluster_jobs (
            id TEXT PRIMARY KEY,
            generation_id TEXT NOT NULL REFERENCES generations(id) ON DELETE CASCADE,
            cluster_id INTEGER NOT NULL,
            answers TEXT NOT NULL,
            category TEXT NOT NULL,
            config TEXT NOT NULL,
            cluster_size INTEGER NOT NULL,
            confidence REAL NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            finished_at TEXT,
            UNIQUE (generation_id, cluster_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hierarchy_nodes (
            id TEXT PRIMARY KEY,
            generation_id TEXT NOT NULL REFERENCES generations(id) ON DELETE CASCADE,
            parent_id TEXT REFERENCES hierarchy_nodes(id) ON DELETE CASCADE,
            level INTEGER NOT NULL,
            node_type TEXT NOT NULL CHECK (node_type IN ('theme', 'code')),
            name TEXT NOT NULL,
            description TEXT,
            confidence TEXT NOT NULL,
            cluster_id INTEGER,
            cluster_size INTEGER,
            embedding,
            brand_variants TEXT,
            example_texts TEXT,
            is_edited INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_generation ON hierarchy_nodes(generation_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_hierarchy_nodes_parent ON hierarchy_nodes(parent_id)")
        .execute(pool)
        .await?;

    // Append-only; node_id deliberately has no foreign key so history
    // survives node deletion.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hierarchy_edits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            generation_id TEXT NOT NULL REFERENCES generations(id) ON DELETE CASCADE,
            node_id TEXT NOT NULL,
            action TEXT NOT NULL,
            payload TEXT NOT NULL,
            node_version INTEGER NOT NULL,
            actor TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_hierarchy_edits_node ON hierarchy_edits(node_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS answer_codes (
            answer_id INTEGER NOT NULL REFERENCES answers(id) ON DELETE CASCADE,
            generation_id TEXT NOT NULL REFERENCES generations(id) ON DELETE CASCADE,
            node_id TEXT NOT NULL,
            code_name TEXT NOT NULL,
            similarity REAL NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (answer_id, generation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Engine tables initialized (generations, cluster_jobs, hierarchy_nodes, hierarchy_edits, answer_codes)"
    );

    Ok(())
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(&s, column)).transpose()
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(value: &str, column: &str) -> Result<T> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T, column: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", column, e)))
}

pub(crate) fn parse_enum<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse::<T>().map_err(Error::Internal)
}
