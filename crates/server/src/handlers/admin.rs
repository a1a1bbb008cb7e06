//! Operator endpoints. All require the admin secret.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::refresh::RefreshReport;
use crate::registration::create_invite;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use ocspwatch_metadata::models::LocationRow;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum request body size for admin endpoints (64 KiB).
const MAX_ADMIN_BODY_SIZE: usize = 64 * 1024;

/// Read an optional JSON body; an empty body yields the default.
async fn read_json_body<T: DeserializeOwned + Default>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_ADMIN_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Create invite request.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CreateInviteRequest {
    pub name: String,
}

/// Create invite response. The token is shown exactly once.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInviteResponse {
    pub location_id: Uuid,
    pub name: String,
    pub invite_token: String,
}

/// POST /v1/admin/invites - Invite a new probe location.
pub async fn create_invite_handler(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateInviteResponse>)> {
    require_admin(&req)?;
    let body: CreateInviteRequest = read_json_body(req).await?;

    let invite = create_invite(state.metadata.as_ref(), &body.name)
        .await
        .map_err(|e| match e {
            crate::registration::RegistrationError::Malformed(msg) => ApiError::BadRequest(msg),
            other => other.into(),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateInviteResponse {
            location_id: invite.location_id,
            name: invite.name,
            invite_token: invite.token.to_base64(),
        }),
    ))
}

/// A probe location as shown to operators. Invite secrets and keys stay private.
#[derive(Debug, Serialize, Deserialize)]
pub struct LocationSummary {
    pub location_id: Uuid,
    pub name: String,
    pub registered: bool,
    pub key_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub registered_at: Option<OffsetDateTime>,
}

impl From<LocationRow> for LocationSummary {
    fn from(row: LocationRow) -> Self {
        Self {
            registered: row.is_registered(),
            location_id: row.location_id,
            name: row.name,
            key_id: row.key_id,
            created_at: row.created_at,
            registered_at: row.registered_at,
        }
    }
}

/// GET /v1/admin/locations - Invited and registered probe locations.
pub async fn list_locations_handler(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<LocationSummary>>> {
    require_admin(&req)?;
    let locations = state.metadata.list_locations().await?;
    Ok(Json(
        locations.into_iter().map(LocationSummary::from).collect(),
    ))
}

/// Refresh request. `n` defaults to `refresh.top_n`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub n: Option<u32>,
}

/// POST /v1/admin/refresh - Run a refresh cycle and wait for it.
///
/// Returns 409 when another cycle is already running.
pub async fn trigger_refresh(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<RefreshReport>> {
    require_admin(&req)?;
    let body: RefreshRequest = read_json_body(req).await?;
    let n = body.n.unwrap_or(state.config.refresh.top_n);

    let report = state.refresher.update(n).await?;
    Ok(Json(report))
}
