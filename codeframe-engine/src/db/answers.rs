//! Category and answer corpus access
//!
//! The engine only reads the corpus, except for writing apply results.

use chrono::Utc;
use codeframe_common::Result;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::models::{AnswerText, Category};

const ID_CHUNK_SIZE: usize = 500;

/// Coding source recorded on answers assigned by apply
pub const CODING_SOURCE_AUTO: &str = "codeframe_auto";

/// Status recorded on answers assigned by apply
pub const STATUS_WHITELIST: &str = "whitelist";

/// Load category by id
pub async fn load_category(pool: &SqlitePool, category_id: i64) -> Result<Option<Category>> {
    let row = sqlx::query("SELECT id, name, description FROM categories WHERE id = ?")
        .bind(category_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| Category {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
    }))
}

/// Answers of a category with no selected code
pub async fn load_uncoded_answers(pool: &SqlitePool, category_id: i64) -> Result<Vec<AnswerText>> {
    let rows = sqlx::query(
        r#"
        SELECT id, answer_text, language
        FROM answers
        WHERE category_id = ? AND selected_code IS NULL
        ORDER BY id
        "#,
    )
    .bind(category_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(answer_from_row).collect())
}

/// Explicitly selected answers, restricted to the category
///
/// Ids belonging to another category (or to no answer) are silently
/// absent from the result; callers compare lengths.
pub async fn load_answers_by_ids(
    pool: &SqlitePool,
    category_id: i64,
    answer_ids: &[i64],
) -> Result<Vec<AnswerText>> {
    let mut answers = Vec::with_capacity(answer_ids.len());

    for chunk in answer_ids.chunks(ID_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, answer_text, language FROM answers WHERE category_id = ");
        builder.push_bind(category_id);
        builder.push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let rows = builder.build().fetch_all(pool).await?;
        answers.extend(rows.iter().map(answer_from_row));
    }

    answers.sort_by_key(|a| a.id);
    Ok(answers)
}

/// Write an apply assignment: answer's code/status plus provenance row
pub async fn record_assignment(
    conn: &mut SqliteConnection,
    answer_id: i64,
    generation_id: Uuid,
    node_id: Uuid,
    code_name: &str,
    similarity: f32,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        UPDATE answers
        SET selected_code = ?, general_status = ?, coding_source = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(code_name)
    .bind(STATUS_WHITELIST)
    .bind(CODING_SOURCE_AUTO)
    .bind(&now)
    .bind(answer_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO answer_codes (answer_id, generation_id, node_id, code_name, similarity, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(answer_id, generation_id) DO UPDATE SET
            node_id = excluded.node_id,
            code_name = excluded.code_name,
            similarity = excluded.similarity,
            created_at = excluded.created_at
        "#,
    )
    .bind(answer_id)
    .bind(generation_id.to_string())
    .bind(node_id.to_string())
    .bind(code_name)
    .bind(similarity as f64)
    .bind(CODING_SOURCE_AUTO)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn answer_from_row(row: &sqlx::sqlite::SqliteRow) -> AnswerText {
    AnswerText {
        id: row.get("id"),
        text: row.get("answer_text"),
        language: row.get("language"),
    }
}
