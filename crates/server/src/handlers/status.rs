//! Responder status endpoint.

use crate::error::ApiResult;
use crate::state::AppState;
use crate::status::{StatusReport, build_status};
use axum::Json;
use axum::extract::State;
use time::OffsetDateTime;

/// GET /v1/status - Latest health of every responder per location.
///
/// Public, like the manifest: it exposes nothing an agent could not measure.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusReport>> {
    let report = build_status(state.metadata.as_ref(), OffsetDateTime::now_utc()).await?;
    Ok(Json(report))
}
