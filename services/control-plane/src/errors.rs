//! Domain error taxonomy.
//!
//! Every fallible operation in the allocation core and the project
//! lifecycle returns `CoreError`. The API layer maps each variant to one
//! HTTP status in exactly one place (`api::error::ApiError::from_core`),
//! so handlers never pick status codes themselves.

use thiserror::Error;

use crate::provisioner::ProvisionerError;

/// Resource dimension named by quota failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Cpu,
    RamGb,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::RamGb => "ram_gb",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Principal lacks the role or scope for the operation.
    #[error("{0}")]
    Forbidden(String),

    /// Request is malformed or violates a domain rule.
    #[error("{0}")]
    Validation(String),

    /// An allocation would overrun a quota row. Carries the failing
    /// dimension plus the exact requested and available amounts.
    #[error("{detail}: need {requested} {resource}, available {available}")]
    QuotaExceeded {
        resource: ResourceKind,
        requested: i64,
        available: i64,
        detail: String,
    },

    #[error("{0}")]
    NotFound(String),

    /// Operation conflicts with current state: duplicate resources, bad
    /// lifecycle transitions, structural quota violations on resize.
    #[error("{0}")]
    Conflict(String),

    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisionerError),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl CoreError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        CoreError::Forbidden(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    /// Map an insert error, turning a unique-constraint violation into
    /// `Conflict` with the supplied message. Everything else stays a
    /// database error.
    pub fn conflict_on_unique(e: sqlx::Error, conflict_msg: impl Into<String>) -> Self {
        match &e {
            sqlx::Error::Database(dbe) if dbe.is_unique_violation() => {
                CoreError::Conflict(conflict_msg.into())
            }
            _ => CoreError::Db(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_reports_both_amounts() {
        let err = CoreError::QuotaExceeded {
            resource: ResourceKind::Cpu,
            requested: 2,
            available: 1,
            detail: "quota exceeded for 'team_a' at site 'east-1'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("need 2 cpu"), "message was: {msg}");
        assert!(msg.contains("available 1"), "message was: {msg}");
    }

    #[test]
    fn resource_kind_names() {
        assert_eq!(ResourceKind::Cpu.as_str(), "cpu");
        assert_eq!(ResourceKind::RamGb.as_str(), "ram_gb");
    }
}
