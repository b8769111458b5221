//! Database test utilities

use codeframe_engine::db;
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

/// Temporary database with every table created
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().expect("temp dir");
    let pool = db::init_database_pool(&dir.path().join("codeframe_test.db"))
        .await
        .expect("database init");
    (dir, pool)
}

pub async fn seed_category(pool: &SqlitePool, name: &str) -> i64 {
    sqlx::query("INSERT INTO categories (name, description) VALUES (?, ?)")
        .bind(name)
        .bind(format!("Answers about {}", name))
        .execute(pool)
        .await
        .expect("insert category")
        .last_insert_rowid()
}

/// Insert answers in order, returning their ids
pub async fn seed_answers(pool: &SqlitePool, category_id: i64, texts: &[&str]) -> Vec<i64> {
    let mut ids = Vec::with_capacity(texts.len());
    for text in texts {
        let id = sqlx::query("INSERT INTO answers (category_id, answer_text, language) VALUES (?, ?, 'en')")
            .bind(category_id)
            .bind(text)
            .execute(pool)
            .await
            .expect("insert answer")
            .last_insert_rowid();
        ids.push(id);
    }
    ids
}

/// `n` distinct generic answers
pub fn numbered_answers(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("answer number {}", i)).collect()
}

/// Seed `n` distinct generic answers
pub async fn seed_numbered(pool: &SqlitePool, category_id: i64, n: usize) -> Vec<i64> {
    let texts = numbered_answers(n);
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    seed_answers(pool, category_id, &refs).await
}

/// (selected_code, coding_source) of an answer
pub async fn answer_row(pool: &SqlitePool, answer_id: i64) -> (Option<String>, Option<String>) {
    let row = sqlx::query("SELECT selected_code, coding_source FROM answers WHERE id = ?")
        .bind(answer_id)
        .fetch_one(pool)
        .await
        .expect("answer row");
    (row.get("selected_code"), row.get("coding_source"))
}
