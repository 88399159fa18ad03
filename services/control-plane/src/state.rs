//! Application state shared across request handlers.

use std::sync::Arc;

use crate::db::Database;
use crate::lifecycle::ProjectLifecycle;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
    lifecycle: ProjectLifecycle,
}

impl AppState {
    /// Create a new application state.
    pub fn new(db: Database, lifecycle: ProjectLifecycle) -> Self {
        Self {
            inner: Arc::new(AppStateInner { db, lifecycle }),
        }
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    /// Get a reference to the project lifecycle service.
    pub fn lifecycle(&self) -> &ProjectLifecycle {
        &self.inner.lifecycle
    }
}
