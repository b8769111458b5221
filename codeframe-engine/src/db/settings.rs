//! Settings database operations
//!
//! Runtime-tunable values in the shared key/value `settings` table. Each
//! accessor falls back to its compiled default when the key is absent.

use codeframe_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Default similarity an answer must reach to be auto-assigned
pub const DEFAULT_APPLY_THRESHOLD: f32 = 0.9;

/// Default ceiling for "database is locked" retries
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Get the apply threshold used when a request does not supply one
pub async fn get_apply_threshold(db: &Pool<Sqlite>) -> Result<f32> {
    get_setting(db, "codeframe_apply_threshold")
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_APPLY_THRESHOLD))
}

/// Store the default apply threshold (0.0-1.0)
///
/// Written by operators directly in the settings table; nothing in the
/// service changes it at runtime.
pub async fn set_apply_threshold(db: &Pool<Sqlite>, threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::InvalidInput(format!(
            "Apply threshold must be within 0.0-1.0 (got {})",
            threshold
        )));
    }
    set_setting(db, "codeframe_apply_threshold", threshold).await
}

/// Get maximum lock wait for database retries
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, "database_max_lock_wait_ms")
        .await
        .map(|opt| opt.unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS))
}

/// MECE overlap threshold; settings table overrides the configured value
pub async fn get_mece_overlap_threshold(db: &Pool<Sqlite>, configured: f32) -> Result<f32> {
    get_setting(db, "mece_overlap_threshold")
        .await
        .map(|opt| opt.unwrap_or(configured))
}

/// MECE gap threshold; settings table overrides the configured value
pub async fn get_mece_gap_threshold(db: &Pool<Sqlite>, configured: f32) -> Result<f32> {
    get_setting(db, "mece_gap_threshold")
        .await
        .map(|opt| opt.unwrap_or(configured))
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    /// Single-connection in-memory database with the settings table
    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        codeframe_common::db::create_shared_tables(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_defaults_when_unset() {
        let pool = setup_test_db().await;
        assert_eq!(get_apply_threshold(&pool).await.unwrap(), DEFAULT_APPLY_THRESHOLD);
        assert_eq!(get_max_lock_wait_ms(&pool).await.unwrap(), DEFAULT_MAX_LOCK_WAIT_MS);
        assert_eq!(get_mece_overlap_threshold(&pool, 0.85).await.unwrap(), 0.85);
        assert_eq!(get_mece_gap_threshold(&pool, 0.5).await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_apply_threshold_round_trip() {
        let pool = setup_test_db().await;
        set_apply_threshold(&pool, 0.75).await.unwrap();
        assert_eq!(get_apply_threshold(&pool).await.unwrap(), 0.75);
    }

    #[tokio::test]
    async fn test_apply_threshold_out_of_range_rejected() {
        let pool = setup_test_db().await;
        assert!(matches!(
            set_apply_threshold(&pool, 1.5).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_settings_override_configured_mece_threshold() {
        let pool = setup_test_db().await;
        set_setting(&pool, "mece_overlap_threshold", 0.95f32).await.unwrap();
        assert_eq!(get_mece_overlap_threshold(&pool, 0.85).await.unwrap(), 0.95);
    }

    #[tokio::test]
    async fn test_unparseable_setting_is_config_error() {
        let pool = setup_test_db().await;
        set_setting(&pool, "database_max_lock_wait_ms", "soon").await.unwrap();
        assert!(matches!(get_max_lock_wait_ms(&pool).await, Err(Error::Config(_))));
    }
}
