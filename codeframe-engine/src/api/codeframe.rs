//! Codeframe generation API handlers
//!
//! POST /api/codeframe/generate, GET /api/codeframe/:id/status,
//! POST /api/codeframe/:id/apply, POST /api/codeframe/:id/cancel,
//! GET /api/codeframe/category/:category_id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use codeframe_common::Error;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::parse_body;
use crate::error::ApiResult;
use crate::models::{GenerationHandle, GenerationStatusReport, GenerationSummary};
use crate::services::{ApplyReport, StartRequest};
use crate::AppState;

/// POST /api/codeframe/:id/apply request
#[derive(Debug, Default, Deserialize)]
pub struct ApplyRequest {
    /// Falls back to the `codeframe_apply_threshold` setting
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub overwrite_existing: bool,
}

/// GET /api/codeframe/category/:category_id response
#[derive(Debug, Serialize, Deserialize)]
pub struct CategoryGenerationsResponse {
    pub category_id: i64,
    pub generations: Vec<GenerationSummary>,
}

/// POST /api/codeframe/generate
///
/// Embeds and clusters synchronously, then returns 202 Accepted while the
/// per-cluster jobs run in the background.
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<GenerationHandle>)> {
    let request: StartRequest = parse_body(body)?;
    let category_id = request.category_id;

    match state.orchestrator.start_generation(request).await {
        Ok(handle) => {
            info!(
                generation_id = %handle.generation_id,
                category_id,
                "Codeframe generation accepted"
            );
            Ok((StatusCode::ACCEPTED, Json(handle)))
        }
        Err(e) => {
            if matches!(e, Error::Upstream { .. } | Error::Database(_) | Error::Internal(_)) {
                state.record_error(e.to_string()).await;
            }
            Err(e.into())
        }
    }
}

/// GET /api/codeframe/:id/status
pub async fn status(
    State(state): State<AppState>,
    Path(generation_id): Path<Uuid>,
) -> ApiResult<Json<GenerationStatusReport>> {
    Ok(Json(state.orchestrator.generation_status(generation_id).await?))
}

/// POST /api/codeframe/:id/apply
///
/// An empty body applies with the stored threshold.
pub async fn apply(
    State(state): State<AppState>,
    Path(generation_id): Path<Uuid>,
    body: Option<Json<serde_json::Value>>,
) -> ApiResult<Json<ApplyReport>> {
    let request: ApplyRequest = match body {
        Some(Json(body)) => parse_body(body)?,
        None => ApplyRequest::default(),
    };

    let report = state
        .orchestrator
        .apply_codeframe(generation_id, request.threshold, request.overwrite_existing)
        .await?;

    Ok(Json(report))
}

/// POST /api/codeframe/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(generation_id): Path<Uuid>,
) -> ApiResult<Json<GenerationStatusReport>> {
    Ok(Json(state.orchestrator.cancel_generation(generation_id).await?))
}

/// GET /api/codeframe/category/:category_id
pub async fn list_for_category(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
) -> ApiResult<Json<CategoryGenerationsResponse>> {
    let generations = state.orchestrator.list_generations(category_id).await?;
    Ok(Json(CategoryGenerationsResponse {
        category_id,
        generations,
    }))
}

/// Build codeframe lifecycle routes
pub fn codeframe_routes() -> Router<AppState> {
    Router::new()
        .route("/api/codeframe/generate", post(generate))
        .route("/api/codeframe/:id/status", get(status))
        .route("/api/codeframe/:id/apply", post(apply))
        .route("/api/codeframe/:id/cancel", post(cancel))
        .route("/api/codeframe/category/:category_id", get(list_for_category))
}
