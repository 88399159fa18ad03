//! HTTP adapter for the external rollout system.
//!
//! Speaks the rollout system's application API: namespaces are created
//! under a configured application, and status is read back as a pair of
//! sync/health strings. The only statuses this adapter trusts are
//! "Synced"+"Healthy" (done) and health "Degraded" (failed); everything
//! else counts as still converging.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{NamespaceSpec, Provisioner, ProvisionerError, RolloutStatus};

/// Configuration for [`HttpProvisioner`].
#[derive(Debug, Clone)]
pub struct HttpProvisionerConfig {
    /// Base URL of the rollout system, e.g. `https://rollout.internal:8443`.
    pub base_url: String,
    /// Application all namespaces are created under.
    pub app_name: String,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpProvisionerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            app_name: "caphub".to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpProvisioner {
    client: reqwest::Client,
    base_url: String,
    app_name: String,
}

impl HttpProvisioner {
    pub fn new(config: &HttpProvisionerConfig) -> Result<Self, ProvisionerError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let bearer = format!("Bearer {}", token.trim());
            let value = HeaderValue::from_str(&bearer)
                .map_err(|e| ProvisionerError::Request(format!("invalid bearer token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("caphub-control-plane/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_name: config.app_name.clone(),
        })
    }

    fn namespaces_url(&self) -> String {
        format!(
            "{}/api/v1/applications/{}/namespaces",
            self.base_url, self.app_name
        )
    }

    fn namespace_url(&self, namespace_name: &str) -> String {
        format!("{}/{}", self.namespaces_url(), namespace_name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct NamespaceStatusResponse {
    #[serde(default)]
    status: StatusBody,
}

#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    #[serde(default)]
    sync: StatusField,
    #[serde(default)]
    health: StatusField,
}

#[derive(Debug, Default, Deserialize)]
struct StatusField {
    #[serde(default)]
    status: String,
}

fn classify(sync: &str, health: &str) -> RolloutStatus {
    match (sync, health) {
        ("Synced", "Healthy") => RolloutStatus::Healthy,
        (_, "Degraded") => RolloutStatus::Failed,
        _ => RolloutStatus::Syncing,
    }
}

async fn unexpected_status(resp: reqwest::Response) -> ProvisionerError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ProvisionerError::UnexpectedStatus { status, body }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn request(&self, spec: &NamespaceSpec) -> Result<(), ProvisionerError> {
        let resp = self
            .client
            .post(self.namespaces_url())
            .json(spec)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(unexpected_status(resp).await);
        }
        Ok(())
    }

    async fn status(&self, namespace_name: &str) -> Result<RolloutStatus, ProvisionerError> {
        let resp = self
            .client
            .get(self.namespace_url(namespace_name))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(unexpected_status(resp).await);
        }

        let body: NamespaceStatusResponse = resp.json().await?;
        Ok(classify(&body.status.sync.status, &body.status.health.status))
    }

    async fn teardown(&self, namespace_name: &str) -> Result<(), ProvisionerError> {
        let resp = self
            .client
            .delete(self.namespace_url(namespace_name))
            .send()
            .await?;

        // Already gone counts as torn down.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(unexpected_status(resp).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_requires_synced_and_healthy() {
        assert_eq!(classify("Synced", "Healthy"), RolloutStatus::Healthy);
        assert_eq!(classify("OutOfSync", "Healthy"), RolloutStatus::Syncing);
        assert_eq!(classify("Synced", "Progressing"), RolloutStatus::Syncing);
        assert_eq!(classify("", ""), RolloutStatus::Syncing);
    }

    #[test]
    fn classify_degraded_is_failed_regardless_of_sync() {
        assert_eq!(classify("Synced", "Degraded"), RolloutStatus::Failed);
        assert_eq!(classify("OutOfSync", "Degraded"), RolloutStatus::Failed);
    }

    #[test]
    fn status_body_tolerates_missing_fields() {
        let parsed: NamespaceStatusResponse = serde_json::from_str("{}").expect("parse");
        assert_eq!(
            classify(&parsed.status.sync.status, &parsed.status.health.status),
            RolloutStatus::Syncing
        );
    }

    #[test]
    fn urls_are_rooted_at_the_application() {
        let provisioner = HttpProvisioner::new(&HttpProvisionerConfig {
            base_url: "http://rollout:8090/".to_string(),
            app_name: "caphub".to_string(),
            token: None,
            request_timeout: Duration::from_secs(5),
        })
        .expect("build client");
        assert_eq!(
            provisioner.namespace_url("acme-api"),
            "http://rollout:8090/api/v1/applications/caphub/namespaces/acme-api"
        );
    }
}
