//! Allocation endpoints: the capacity tree and server assignments.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use caphub_id::{AllocationId, FieldId, ServerId};

use crate::allocation::{admin, tree};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::db::org::ServerAllocationRow;
use crate::state::AppState;

/// Create allocation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/tree", get(get_tree))
        .route("/servers", post(assign_server))
        .route("/servers/{allocation_id}", delete(remove_server_assignment))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to assign a server to a field.
#[derive(Debug, Deserialize, Serialize)]
pub struct AssignServerRequest {
    /// Server to assign.
    pub server_id: String,

    /// Field that receives the capacity.
    pub field_id: String,
}

/// Response for a server assignment.
#[derive(Debug, Serialize)]
pub struct ServerAllocationResponse {
    /// Allocation ID.
    pub id: String,

    /// Assigned server.
    pub server_id: String,

    /// Receiving field.
    pub field_id: String,

    /// Principal that made the assignment.
    pub allocated_by: Option<String>,

    /// When the assignment was made.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Fetch the allocation tree, trimmed to what the caller may see.
///
/// GET /v1/allocations/tree
async fn get_tree(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let snapshot = tree::snapshot(state.db().pool(), &principal)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok(Json(snapshot))
}

/// Assign a server to a field.
///
/// POST /v1/allocations/servers
async fn assign_server(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<AssignServerRequest>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let server_id: ServerId = req.server_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_server_id", "Invalid server ID format")
            .with_request_id(request_id.clone())
    })?;
    let field_id: FieldId = req.field_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_field_id", "Invalid field ID format")
            .with_request_id(request_id.clone())
    })?;

    let row = admin::assign_server(state.db().pool(), &principal, &server_id, &field_id)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok((
        StatusCode::CREATED,
        Json(ServerAllocationResponse::from(row)),
    )
        .into_response())
}

/// Remove a server assignment.
///
/// DELETE /v1/allocations/servers/{allocation_id}
///
/// Refused when the field's remaining capacity would no longer cover the
/// quotas already carved from it.
async fn remove_server_assignment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(allocation_id): Path<String>,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id.clone();
    let principal = ctx.require_principal()?.clone();

    let allocation_id: AllocationId = allocation_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_allocation_id", "Invalid allocation ID format")
            .with_request_id(request_id.clone())
    })?;

    admin::remove_server_assignment(state.db().pool(), &principal, &allocation_id)
        .await
        .map_err(|e| ApiError::from_core(e, &request_id))?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

impl From<ServerAllocationRow> for ServerAllocationResponse {
    fn from(row: ServerAllocationRow) -> Self {
        Self {
            id: row.id,
            server_id: row.server_id,
            field_id: row.field_id,
            allocated_by: row.allocated_by,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_server_request_deserialization() {
        let json = r#"{
            "server_id": "srv_01ARZ3NDEKTSV4RRFFQ69G5FAV",
            "field_id": "fld_01ARZ3NDEKTSV4RRFFQ69G5FAV"
        }"#;
        let req: AssignServerRequest = serde_json::from_str(json).unwrap();
        assert!(req.server_id.starts_with("srv_"));
    }

    #[test]
    fn test_server_allocation_response_serialization() {
        let response = ServerAllocationResponse {
            id: "alloc_01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            server_id: "srv_01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            field_id: "fld_01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            allocated_by: Some("admin@center".to_string()),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"allocated_by\":\"admin@center\""));
    }
}
