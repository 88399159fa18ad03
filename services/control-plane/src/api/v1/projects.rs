//! Project API endpoints.
//!
//! Projects are created by team leads against their team's quota and go
//! through the provisioning lifecycle before becoming active.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use caphub_id::{ProjectId, TeamId};

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::db::projects::ProjectRow;
use crate::lifecycle::sla::{PerformanceTier, SlaType};
use crate::lifecycle::CreateProjectParams;
use crate::state::AppState;

/// Create project routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_project))
        .route("/", get(list_projects))
        .route("/{project_id}", get(get_project))
        .route("/{project_id}", delete(delete_project))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to create a new project.
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateProjectRequest {
    /// Team the project belongs to.
    pub team_id: String,

    /// Project name (unique within the team's namespace prefix).
    pub name: String,

    /// Site the project's resources are drawn from.
    pub site: String,

    /// Service level: bronze, silver, or gold.
    pub sla_type: String,

    /// Hardware tier: regular or high_performance.
    pub performance_tier: String,
}

/// Response for a single project.
#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    /// Project ID.
    pub id: String,

    /// Team the project belongs to.
    pub team_id: String,

    /// Project name.
    pub name: String,

    /// Site the reservation was made at.
    pub site: String,

    /// Service level.
    pub sla_type: String,

    /// Hardware tier.
    pub performance_tier: String,

    /// Derived namespace name.
    pub namespace_name: String,

    /// Lifecycle status: provisioning, active, failed, or deleting.
    pub status: String,

    /// CPU cores reserved against the team quota.
    pub reserved_cpu: i64,

    /// RAM (GB) reserved against the team quota.
    pub reserved_ram_gb: i64,

    /// When the project was created.
    pub created_at: DateTime<Utc>,

    /// When the project was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Response for listing projects.
#[derive(Debug, Serialize)]
pub struct ListProjectsResponse {
    /// List of projects.
    pub items: Vec<ProjectResponse>,

    /// Next cursor (or null when there are no more items).
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    pub team_id: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a new project.
///
/// POST /v1/projects
async fn create_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let team_id: TeamId = req.team_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_team_id", "Invalid team ID format")
            .with_request_id(request_id.clone())
    })?;

    let sla_type = SlaType::parse(&req.sla_type).ok_or_else(|| {
        ApiError::unprocessable_entity(
            "validation_failed",
            format!("unknown sla_type '{}'", req.sla_type),
        )
        .with_request_id(request_id.clone())
    })?;

    let performance_tier = PerformanceTier::parse(&req.performance_tier).ok_or_else(|| {
        ApiError::unprocessable_entity(
            "validation_failed",
            format!("unknown performance_tier '{}'", req.performance_tier),
        )
        .with_request_id(request_id.clone())
    })?;

    let project = state
        .lifecycle()
        .create_project(
            &principal,
            CreateProjectParams {
                team_id,
                name: req.name,
                site: req.site,
                sla_type,
                performance_tier,
            },
        )
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok((StatusCode::CREATED, Json(ProjectResponse::from(project))).into_response())
}

/// List projects.
///
/// GET /v1/projects
async fn list_projects(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListProjectsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let team_filter = query
        .team_id
        .as_deref()
        .map(|raw| {
            raw.parse::<TeamId>().map_err(|_| {
                ApiError::bad_request("invalid_team_id", "Invalid team ID format")
                    .with_request_id(request_id.clone())
            })
        })
        .transpose()?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let cursor = query.cursor.as_deref();

    let rows = state
        .lifecycle()
        .list_projects(&principal, team_filter, cursor, limit)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    let next_cursor = rows.last().map(|row| row.id.clone());
    let items: Vec<ProjectResponse> = rows.into_iter().map(ProjectResponse::from).collect();

    Ok(Json(ListProjectsResponse { items, next_cursor }))
}

/// Get a project by ID.
///
/// GET /v1/projects/{project_id}
async fn get_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let project_id: ProjectId = project_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_project_id", "Invalid project ID format")
            .with_request_id(request_id.clone())
    })?;

    let project = state
        .lifecycle()
        .get_project(&principal, &project_id)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok(Json(ProjectResponse::from(project)))
}

/// Delete a project.
///
/// DELETE /v1/projects/{project_id}
///
/// Returns the project snapshot in `deleting` status; the row disappears
/// once the namespace teardown completes.
async fn delete_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let project_id: ProjectId = project_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_project_id", "Invalid project ID format")
            .with_request_id(request_id.clone())
    })?;

    let project = state
        .lifecycle()
        .delete_project(&principal, &project_id)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok((StatusCode::OK, Json(ProjectResponse::from(project))).into_response())
}

impl From<ProjectRow> for ProjectResponse {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            team_id: row.team_id,
            name: row.name,
            site: row.site,
            sla_type: row.sla_type,
            performance_tier: row.performance_tier,
            namespace_name: row.namespace_name,
            status: row.status,
            reserved_cpu: row.reserved_cpu,
            reserved_ram_gb: row.reserved_ram_gb,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_project_request_deserialization() {
        let json = r#"{
            "team_id": "team_01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "name": "etl-pipeline",
            "site": "east-1",
            "sla_type": "silver",
            "performance_tier": "regular"
        }"#;
        let req: CreateProjectRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.name, "etl-pipeline");
        assert_eq!(req.sla_type, "silver");
    }

    #[test]
    fn test_project_response_serialization() {
        let response = ProjectResponse {
            id: "prj_01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            team_id: "team_01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            name: "etl-pipeline".to_string(),
            site: "east-1".to_string(),
            sla_type: "silver".to_string(),
            performance_tier: "regular".to_string(),
            namespace_name: "data-eng-etl-pipeline".to_string(),
            status: "provisioning".to_string(),
            reserved_cpu: 4,
            reserved_ram_gb: 16,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"namespace_name\""));
        assert!(json.contains("\"status\":\"provisioning\""));
        assert!(json.contains("\"reserved_cpu\":4"));
    }

    #[test]
    fn test_unknown_sla_type_is_rejected() {
        assert!(SlaType::parse("platinum").is_none());
        assert!(PerformanceTier::parse("turbo").is_none());
    }
}
