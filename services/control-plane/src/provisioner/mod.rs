//! External provisioning capability.
//!
//! The lifecycle drives projects through reserve -> request -> poll ->
//! finalize. Everything behind this trait lives outside the trust
//! boundary: implementations submit namespace descriptors to the rollout
//! system and report its status, nothing more. Quota accounting never
//! crosses this line.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

mod http;

pub use http::{HttpProvisioner, HttpProvisionerConfig};

#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// The request could not be built or sent.
    #[error("provisioner request failed: {0}")]
    Request(String),

    /// The rollout system answered with a non-success status.
    #[error("provisioner returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Transport-level failure (connect, timeout, malformed body).
    #[error("provisioner transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Rollout state of a namespace as reported by the external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutStatus {
    /// Synced and healthy; the namespace is serving.
    Healthy,
    /// Still converging.
    Syncing,
    /// The rollout system gave up on this namespace.
    Failed,
}

/// Namespace descriptor submitted to the rollout system.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceSpec {
    pub namespace_name: String,
    pub team_id: String,
    pub cpu: i64,
    pub ram_gb: i64,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Submit the namespace descriptor and trigger a sync.
    async fn request(&self, spec: &NamespaceSpec) -> Result<(), ProvisionerError>;

    /// Report the current rollout status of a namespace.
    async fn status(&self, namespace_name: &str) -> Result<RolloutStatus, ProvisionerError>;

    /// Remove a namespace from the rollout system. Unknown namespaces are
    /// treated as already torn down.
    async fn teardown(&self, namespace_name: &str) -> Result<(), ProvisionerError>;
}

/// Dev-mode provisioner: accepts every request and reports healthy on the
/// first poll.
#[derive(Debug, Default)]
pub struct StubProvisioner;

#[async_trait]
impl Provisioner for StubProvisioner {
    async fn request(&self, spec: &NamespaceSpec) -> Result<(), ProvisionerError> {
        info!(namespace = %spec.namespace_name, "stub provisioner accepted namespace");
        Ok(())
    }

    async fn status(&self, _namespace_name: &str) -> Result<RolloutStatus, ProvisionerError> {
        Ok(RolloutStatus::Healthy)
    }

    async fn teardown(&self, namespace_name: &str) -> Result<(), ProvisionerError> {
        info!(namespace = %namespace_name, "stub provisioner removed namespace");
        Ok(())
    }
}
