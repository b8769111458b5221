//! Hierarchy review API handlers

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::parse_body;
use crate::error::ApiResult;
use crate::models::{EditOutcome, HierarchyEdit, HierarchyEditRecord, TreeNode};
use crate::AppState;

/// Header naming the reviewer, recorded in the audit history
pub const ACTOR_HEADER: &str = "x-codeframe-actor";

/// GET /api/codeframe/:id/hierarchy response
#[derive(Debug, Serialize, Deserialize)]
pub struct HierarchyResponse {
    pub generation_id: Uuid,
    pub themes: Vec<TreeNode>,
}

/// GET /api/codeframe/:id/hierarchy
pub async fn get_hierarchy(
    State(state): State<AppState>,
    Path(generation_id): Path<Uuid>,
) -> ApiResult<Json<HierarchyResponse>> {
    let themes = state.orchestrator.fetch_hierarchy(generation_id).await?;
    Ok(Json(HierarchyResponse { generation_id, themes }))
}

/// PATCH /api/codeframe/:id/hierarchy
///
/// Body is tagged by `action` (rename, merge, move, delete).
pub async fn edit_hierarchy(
    State(state): State<AppState>,
    Path(generation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<EditOutcome>> {
    let edit: HierarchyEdit = parse_body(body)?;
    let actor = headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let outcome = state
        .orchestrator
        .edit_hierarchy(generation_id, &edit, actor)
        .await?;

    Ok(Json(outcome))
}

/// GET /api/codeframe/:id/hierarchy/:node_id/history
pub async fn node_history(
    State(state): State<AppState>,
    Path((generation_id, node_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Vec<HierarchyEditRecord>>> {
    Ok(Json(state.orchestrator.node_history(generation_id, node_id).await?))
}

/// Build hierarchy review routes
pub fn hierarchy_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/codeframe/:id/hierarchy",
            get(get_hierarchy).patch(edit_hierarchy),
        )
        .route("/api/codeframe/:id/hierarchy/:node_id/history", get(node_history))
}
