//! Quota administration endpoints.
//!
//! Field admins carve department quotas out of their field's server
//! capacity; department admins carve team quotas out of their department
//! quota. Resizes go through the same arithmetic as creates.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use caphub_id::{DepartmentId, FieldId, QuotaRowId, TeamId};

use crate::allocation::admin::{self, CreateDepartmentQuota, CreateTeamQuota};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::db::quota_rows::QuotaRow;
use crate::state::AppState;

/// Create quota administration routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/departments", post(create_department_quota))
        .route("/departments/{quota_id}", patch(resize_department_quota))
        .route("/teams", post(create_team_quota))
        .route("/teams/{quota_id}", patch(resize_team_quota))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to carve a department quota out of field capacity.
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateDepartmentQuotaRequest {
    /// Field whose capacity backs the quota.
    pub field_id: String,

    /// Department the quota is for.
    pub department_id: String,

    /// Site the quota applies to.
    pub site: String,

    /// CPU cores granted.
    pub cpu_limit: i64,

    /// RAM (GB) granted.
    pub ram_gb_limit: i64,
}

/// Request to carve a team quota out of a department quota.
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateTeamQuotaRequest {
    /// Department whose quota backs the grant.
    pub department_id: String,

    /// Team the quota is for.
    pub team_id: String,

    /// Site the quota applies to.
    pub site: String,

    /// CPU cores granted.
    pub cpu_limit: i64,

    /// RAM (GB) granted.
    pub ram_gb_limit: i64,
}

/// Request to change the limits on an existing quota row.
#[derive(Debug, Deserialize, Serialize)]
pub struct ResizeQuotaRequest {
    pub cpu_limit: i64,
    pub ram_gb_limit: i64,
}

/// Response for a single quota row.
#[derive(Debug, Serialize)]
pub struct QuotaRowResponse {
    /// Quota row ID.
    pub id: String,

    /// Scope type: department or team.
    pub scope_type: String,

    /// Entity the quota belongs to.
    pub scope_entity_id: String,

    /// Entity the quota was carved from.
    pub parent_scope_id: String,

    /// Site the quota applies to.
    pub site: String,

    pub cpu_limit: i64,
    pub ram_gb_limit: i64,
    pub cpu_used: i64,
    pub ram_gb_used: i64,

    /// Remaining CPU headroom.
    pub cpu_available: i64,

    /// Remaining RAM headroom.
    pub ram_gb_available: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Carve a department quota out of field capacity.
///
/// POST /v1/quotas/departments
async fn create_department_quota(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateDepartmentQuotaRequest>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let field_id: FieldId = req.field_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_field_id", "Invalid field ID format")
            .with_request_id(request_id.clone())
    })?;
    let department_id: DepartmentId = req.department_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_department_id", "Invalid department ID format")
            .with_request_id(request_id.clone())
    })?;

    let row = admin::create_department_quota(
        state.db().pool(),
        &principal,
        CreateDepartmentQuota {
            field_id,
            department_id,
            site: req.site,
            cpu_limit: req.cpu_limit,
            ram_gb_limit: req.ram_gb_limit,
        },
    )
    .await
    .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok((StatusCode::CREATED, Json(QuotaRowResponse::from(row))).into_response())
}

/// Resize a department quota.
///
/// PATCH /v1/quotas/departments/{quota_id}
async fn resize_department_quota(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(quota_id): Path<String>,
    Json(req): Json<ResizeQuotaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let quota_id: QuotaRowId = quota_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_quota_id", "Invalid quota row ID format")
            .with_request_id(request_id.clone())
    })?;

    let row = admin::resize_department_quota(
        state.db().pool(),
        &principal,
        &quota_id,
        req.cpu_limit,
        req.ram_gb_limit,
    )
    .await
    .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok(Json(QuotaRowResponse::from(row)))
}

/// Carve a team quota out of a department quota.
///
/// POST /v1/quotas/teams
async fn create_team_quota(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateTeamQuotaRequest>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let department_id: DepartmentId = req.department_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_department_id", "Invalid department ID format")
            .with_request_id(request_id.clone())
    })?;
    let team_id: TeamId = req.team_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_team_id", "Invalid team ID format")
            .with_request_id(request_id.clone())
    })?;

    let row = admin::create_team_quota(
        state.db().pool(),
        &principal,
        CreateTeamQuota {
            department_id,
            team_id,
            site: req.site,
            cpu_limit: req.cpu_limit,
            ram_gb_limit: req.ram_gb_limit,
        },
    )
    .await
    .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok((StatusCode::CREATED, Json(QuotaRowResponse::from(row))).into_response())
}

/// Resize a team quota.
///
/// PATCH /v1/quotas/teams/{quota_id}
async fn resize_team_quota(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(quota_id): Path<String>,
    Json(req): Json<ResizeQuotaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let quota_id: QuotaRowId = quota_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_quota_id", "Invalid quota row ID format")
            .with_request_id(request_id.clone())
    })?;

    let row = admin::resize_team_quota(
        state.db().pool(),
        &principal,
        &quota_id,
        req.cpu_limit,
        req.ram_gb_limit,
    )
    .await
    .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok(Json(QuotaRowResponse::from(row)))
}

impl From<QuotaRow> for QuotaRowResponse {
    fn from(row: QuotaRow) -> Self {
        let cpu_available = row.cpu_available();
        let ram_gb_available = row.ram_gb_available();
        Self {
            id: row.id,
            scope_type: row.scope_type,
            scope_entity_id: row.scope_entity_id,
            parent_scope_id: row.parent_scope_id,
            site: row.site,
            cpu_limit: row.cpu_limit,
            ram_gb_limit: row.ram_gb_limit,
            cpu_used: row.cpu_used,
            ram_gb_used: row.ram_gb_used,
            cpu_available,
            ram_gb_available,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_department_quota_request_deserialization() {
        let json = r#"{
            "field_id": "fld_01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "department_id": "dept_01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "site": "east-1",
            "cpu_limit": 64,
            "ram_gb_limit": 256
        }"#;
        let req: CreateDepartmentQuotaRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.site, "east-1");
        assert_eq!(req.cpu_limit, 64);
    }

    #[test]
    fn test_quota_row_response_reports_headroom() {
        let row = QuotaRow {
            id: "qta_01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            scope_type: "team".to_string(),
            scope_entity_id: "team_01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            parent_scope_id: "dept_01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            site: "east-1".to_string(),
            cpu_limit: 16,
            ram_gb_limit: 64,
            cpu_used: 10,
            ram_gb_used: 40,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let response = QuotaRowResponse::from(row);
        assert_eq!(response.cpu_available, 6);
        assert_eq!(response.ram_gb_available, 24);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"cpu_available\":6"));
    }
}
