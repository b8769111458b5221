//! Hierarchy node and audit log persistence

use chrono::Utc;
use codeframe_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use super::{from_json, parse_enum, parse_timestamp, parse_uuid, to_json};
use crate::models::{EditAction, HierarchyEditRecord, HierarchyNode};
use crate::services::vector_codec::{decode_embedding, encode_embedding, RawEmbedding};

const NODE_COLUMNS: &str = r#"
    id, generation_id, parent_id, level, node_type, name, description, confidence,
    cluster_id, cluster_size, typeof(embedding) AS embedding_kind,
    CAST(embedding AS BLOB) AS embedding_bytes, brand_variants, example_texts,
    is_edited, version, created_at, updated_at
"#;

/// Insert one node
pub async fn insert_node(conn: &mut SqliteConnection, node: &HierarchyNode) -> Result<()> {
    let brand_variants = node
        .brand_variants
        .as_ref()
        .map(|v| to_json(v, "brand_variants"))
        .transpose()?;
    let example_texts = node
        .example_texts
        .as_ref()
        .map(|v| to_json(v, "example_texts"))
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO hierarchy_nodes (
            id, generation_id, parent_id, level, node_type, name, description, confidence,
            cluster_id, cluster_size, embedding, brand_variants, example_texts,
            is_edited, version, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(node.id.to_string())
    .bind(node.generation_id.to_string())
    .bind(node.parent_id.map(|id| id.to_string()))
    .bind(node.level)
    .bind(node.node_type.as_str())
    .bind(&node.name)
    .bind(&node.description)
    .bind(node.confidence.as_str())
    .bind(node.cluster_id)
    .bind(node.cluster_size)
    .bind(node.embedding.as_deref().map(encode_embedding))
    .bind(brand_variants)
    .bind(example_texts)
    .bind(node.is_edited)
    .bind(node.version)
    .bind(node.created_at.to_rfc3339())
    .bind(node.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Replace the nodes proposed for one cluster
///
/// Deleting first makes a re-run of the same job idempotent.
pub async fn replace_cluster_nodes(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    cluster_id: i64,
    nodes: &[HierarchyNode],
) -> Result<()> {
    sqlx::query("DELETE FROM hierarchy_nodes WHERE generation_id = ? AND cluster_id = ?")
        .bind(generation_id.to_string())
        .bind(cluster_id)
        .execute(&mut *conn)
        .await?;

    // Parents precede children in proposal order
    for node in nodes {
        insert_node(conn, node).await?;
    }

    Ok(())
}

/// All nodes of a generation
pub async fn load_nodes(pool: &SqlitePool, generation_id: Uuid) -> Result<Vec<HierarchyNode>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM hierarchy_nodes WHERE generation_id = ? ORDER BY level, name",
        NODE_COLUMNS
    ))
    .bind(generation_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(node_from_row).collect()
}

/// Load one node
pub async fn load_node(conn: &mut SqliteConnection, node_id: Uuid) -> Result<Option<HierarchyNode>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM hierarchy_nodes WHERE id = ?",
        NODE_COLUMNS
    ))
    .bind(node_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| node_from_row(&row)).transpose()
}

/// (themes, codes) in a generation
pub async fn count_nodes(pool: &SqlitePool, generation_id: Uuid) -> Result<(usize, usize)> {
    let (themes, codes): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN node_type = 'theme' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN node_type = 'code' THEN 1 ELSE 0 END), 0)
        FROM hierarchy_nodes
        WHERE generation_id = ?
        "#,
    )
    .bind(generation_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok((themes as usize, codes as usize))
}

/// Remove every node of a generation (cancellation)
pub async fn delete_generation_nodes(conn: &mut SqliteConnection, generation_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM hierarchy_nodes WHERE generation_id = ?")
        .bind(generation_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Store a node's embedding (f32 LE blob)
pub async fn update_node_embedding(pool: &SqlitePool, node_id: Uuid, embedding: &[f32]) -> Result<()> {
    sqlx::query("UPDATE hierarchy_nodes SET embedding = ? WHERE id = ?")
        .bind(encode_embedding(embedding))
        .bind(node_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Rename, mark edited, clear the stale embedding; returns the new version
pub async fn rename_node(conn: &mut SqliteConnection, node_id: Uuid, new_name: &str) -> Result<i64> {
    let version: i64 = sqlx::query_scalar(
        r#"
        UPDATE hierarchy_nodes
        SET name = ?, is_edited = 1, embedding = NULL, version = version + 1, updated_at = ?
        WHERE id = ?
        RETURNING version
        "#,
    )
    .bind(new_name)
    .bind(Utc::now().to_rfc3339())
    .bind(node_id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    Ok(version)
}

/// Re-parent a node and recompute levels of its subtree; returns the new version
pub async fn set_parent(
    conn: &mut SqliteConnection,
    node_id: Uuid,
    parent_id: Option<Uuid>,
    level: i64,
) -> Result<i64> {
    let version: i64 = sqlx::query_scalar(
        r#"
        UPDATE hierarchy_nodes
        SET parent_id = ?, is_edited = 1, version = version + 1, updated_at = ?
        WHERE id = ?
        RETURNING version
        "#,
    )
    .bind(parent_id.map(|id| id.to_string()))
    .bind(Utc::now().to_rfc3339())
    .bind(node_id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        WITH RECURSIVE subtree(id, depth) AS (
            SELECT id, 0 FROM hierarchy_nodes WHERE id = ?
            UNION ALL
            SELECT h.id, subtree.depth + 1
            FROM hierarchy_nodes h JOIN subtree ON h.parent_id = subtree.id
        )
        UPDATE hierarchy_nodes
        SET level = ? + (SELECT depth FROM subtree WHERE subtree.id = hierarchy_nodes.id)
        WHERE id IN (SELECT id FROM subtree)
        "#,
    )
    .bind(node_id.to_string())
    .bind(level)
    .execute(&mut *conn)
    .await?;

    Ok(version)
}

/// Every descendant of a node (excluding the node itself)
pub async fn descendant_ids(conn: &mut SqliteConnection, node_id: Uuid) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM hierarchy_nodes WHERE parent_id = ?
            UNION
            SELECT h.id FROM hierarchy_nodes h JOIN subtree ON h.parent_id = subtree.id
        )
        SELECT id FROM subtree
        "#,
    )
    .bind(node_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    ids.iter().map(|id| parse_uuid(id, "id")).collect()
}

/// Move every child of `from_parent` under `to_parent`
pub async fn reparent_children(
    conn: &mut SqliteConnection,
    from_parent: Uuid,
    to_parent: Uuid,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE hierarchy_nodes SET parent_id = ?, updated_at = ? WHERE parent_id = ?",
    )
    .bind(to_parent.to_string())
    .bind(Utc::now().to_rfc3339())
    .bind(from_parent.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Delete a node; descendants go with it via ON DELETE CASCADE
pub async fn delete_node(conn: &mut SqliteConnection, node_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM hierarchy_nodes WHERE id = ?")
        .bind(node_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Append an audit entry
pub async fn append_edit(
    conn: &mut SqliteConnection,
    generation_id: Uuid,
    node_id: Uuid,
    action: EditAction,
    payload: &serde_json::Value,
    node_version: i64,
    actor: Option<&str>,
) -> Result<i64> {
    let payload = to_json(payload, "payload")?;

    let result = sqlx::query(
        r#"
        INSERT INTO hierarchy_edits (generation_id, node_id, action, payload, node_version, actor, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(generation_id.to_string())
    .bind(node_id.to_string())
    .bind(action.as_str())
    .bind(payload)
    .bind(node_version)
    .bind(actor)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Audit entries of a node, oldest first
pub async fn load_edits(
    pool: &SqlitePool,
    generation_id: Uuid,
    node_id: Uuid,
) -> Result<Vec<HierarchyEditRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, generation_id, node_id, action, payload, node_version, actor, created_at
        FROM hierarchy_edits
        WHERE generation_id = ? AND node_id = ?
        ORDER BY id
        "#,
    )
    .bind(generation_id.to_string())
    .bind(node_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let generation_id: String = row.get("generation_id");
            let node_id: String = row.get("node_id");
            let action: String = row.get("action");
            let payload: String = row.get("payload");
            let created_at: String = row.get("created_at");

            Ok(HierarchyEditRecord {
                id: row.get("id"),
                generation_id: parse_uuid(&generation_id, "generation_id")?,
                node_id: parse_uuid(&node_id, "node_id")?,
                action: parse_enum(&action)?,
                payload: from_json(&payload, "payload")?,
                node_version: row.get("node_version"),
                actor: row.get("actor"),
                created_at: parse_timestamp(&created_at, "created_at")?,
            })
        })
        .collect()
}

fn node_from_row(row: &SqliteRow) -> Result<HierarchyNode> {
    let id: String = row.get("id");
    let generation_id: String = row.get("generation_id");
    let parent_id: Option<String> = row.get("parent_id");
    let node_type: String = row.get("node_type");
    let confidence: String = row.get("confidence");
    let embedding_kind: String = row.get("embedding_kind");
    let embedding_bytes: Option<Vec<u8>> = row.get("embedding_bytes");
    let brand_variants: Option<String> = row.get("brand_variants");
    let example_texts: Option<String> = row.get("example_texts");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    // An undecodable node embedding is treated as missing and recomputed
    let embedding = match RawEmbedding::from_sql(&embedding_kind, embedding_bytes) {
        Some(raw) => match decode_embedding(&raw) {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(node_id = %id, "Discarding undecodable node embedding: {}", e);
                None
            }
        },
        None => None,
    };

    Ok(HierarchyNode {
        id: parse_uuid(&id, "id")?,
        generation_id: parse_uuid(&generation_id, "generation_id")?,
        parent_id: parent_id.map(|p| parse_uuid(&p, "parent_id")).transpose()?,
        level: row.get("level"),
        node_type: parse_enum(&node_type)?,
        name: row.get("name"),
        description: row.get("description"),
        confidence: parse_enum(&confidence)?,
        cluster_id: row.get("cluster_id"),
        cluster_size: row.get("cluster_size"),
        embedding,
        brand_variants: brand_variants
            .map(|v| from_json(&v, "brand_variants"))
            .transpose()?,
        example_texts: example_texts
            .map(|v| from_json(&v, "example_texts"))
            .transpose()?,
        is_edited: row.get("is_edited"),
        version: row.get("version"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}
