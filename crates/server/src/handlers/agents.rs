//! Probe-agent endpoints: manifest, registration and submission.

use crate::auth::get_trace_id;
use crate::error::{ApiError, ApiResult};
use crate::manifest::build_manifest;
use crate::metrics;
use crate::registration::register_envelope;
use crate::state::AppState;
use crate::submission::submit;
use axum::Json;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use ocspwatch_core::SubmissionReceipt;
use ocspwatch_core::protocol::encode_manifest;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum size of a registration envelope.
const MAX_REGISTRATION_BODY_SIZE: usize = 16 * 1024;

/// Maximum size of a submission envelope.
const MAX_SUBMISSION_BODY_SIZE: usize = 4 * 1024 * 1024;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

async fn read_text_body(req: Request, limit: usize) -> ApiResult<String> {
    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ApiError::BadRequest("body must be UTF-8".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct ManifestParams {
    pub n: Option<u32>,
}

/// GET /v1/manifest.jsonl - Work items for probe agents as NDJSON.
pub async fn get_manifest(
    State(state): State<AppState>,
    Query(params): Query<ManifestParams>,
) -> ApiResult<impl IntoResponse> {
    let n = params.n.unwrap_or(state.config.server.manifest_default_n);
    let entries = build_manifest(
        state.metadata.as_ref(),
        n,
        state.config.server.manifest_max_n,
    )
    .await?;
    let body = encode_manifest(&entries).map_err(|e| ApiError::Internal(e.to_string()))?;
    metrics::MANIFEST_REQUESTS.inc();

    Ok((StatusCode::OK, [(CONTENT_TYPE, NDJSON_CONTENT_TYPE)], body))
}

/// Registration response. Carries nothing secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub location_id: Uuid,
    pub name: String,
    pub key_id: Uuid,
}

/// POST /v1/register - Bind an agent key to an invite.
///
/// The body is a compact JWS self-signed by the key being registered.
/// Every failure is the same 400 `registration rejected`.
pub async fn register(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<RegisterResponse>> {
    let trace_id = get_trace_id(&req).cloned().unwrap_or_default();
    let body = read_text_body(req, MAX_REGISTRATION_BODY_SIZE)
        .await
        .map_err(|_| ApiError::RegistrationRejected)?;

    let location =
        register_envelope(state.metadata.as_ref(), &body, OffsetDateTime::now_utc()).await?;
    let key_id = location.key_id.ok_or_else(|| {
        ApiError::Internal(format!(
            "registered location {} has no key id",
            location.location_id
        ))
    })?;

    tracing::debug!(
        trace_id = %trace_id,
        location_id = %location.location_id,
        key_id = %key_id,
        "Registration response sent"
    );

    Ok(Json(RegisterResponse {
        location_id: location.location_id,
        name: location.name,
        key_id,
    }))
}

/// POST /v1/submit - Ingest a signed batch of measurements.
pub async fn submit_results(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<SubmissionReceipt>> {
    let trace_id = get_trace_id(&req).cloned().unwrap_or_default();
    let body = read_text_body(req, MAX_SUBMISSION_BODY_SIZE).await?;
    let receipt = submit(state.metadata.as_ref(), &body, OffsetDateTime::now_utc()).await?;
    tracing::debug!(
        trace_id = %trace_id,
        accepted = receipt.accepted,
        skipped = receipt.skipped,
        "Submission receipt sent"
    );
    Ok(Json(receipt))
}
