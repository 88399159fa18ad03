//! API v1 routes.

mod allocations;
mod projects;
mod quotas;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/projects", projects::routes())
        .nest("/quotas", quotas::routes())
        .nest("/allocations", allocations::routes())
}
