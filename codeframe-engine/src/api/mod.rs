//! HTTP API handlers for codeframe-engine
//!
//! REST endpoints for the generation lifecycle and hierarchy review, plus
//! an SSE progress stream.

pub mod codeframe;
pub mod health;
pub mod hierarchy;
pub mod sse;

pub use codeframe::codeframe_routes;
pub use health::health_routes;
pub use hierarchy::hierarchy_routes;
pub use sse::event_stream;

use serde::de::DeserializeOwned;

use crate::error::{ApiError, ApiResult};

/// Decode a JSON body, reporting shape errors as 400
///
/// The stock `Json` extractor answers 422 for well-formed JSON of the
/// wrong shape.
pub(crate) fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> ApiResult<T> {
    serde_json::from_value(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}
