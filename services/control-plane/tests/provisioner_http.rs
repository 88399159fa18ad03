//! Wire-level tests for the rollout system HTTP adapter.

use std::time::Duration;

use caphub_control_plane::provisioner::{
    HttpProvisioner, HttpProvisionerConfig, NamespaceSpec, Provisioner, ProvisionerError,
    RolloutStatus,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provisioner_for(server: &MockServer, token: Option<&str>) -> HttpProvisioner {
    HttpProvisioner::new(&HttpProvisionerConfig {
        base_url: server.uri(),
        app_name: "caphub".to_string(),
        token: token.map(|t| t.to_string()),
        request_timeout: Duration::from_secs(2),
    })
    .expect("build provisioner client")
}

fn spec() -> NamespaceSpec {
    NamespaceSpec {
        namespace_name: "ingest-etl".to_string(),
        team_id: "team_01hx".to_string(),
        cpu: 4,
        ram_gb: 16,
    }
}

#[tokio::test]
async fn request_posts_the_namespace_descriptor_with_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/applications/caphub/namespaces"))
        .and(header("authorization", "Bearer rollout-secret"))
        .and(body_json(serde_json::json!({
            "namespace_name": "ingest-etl",
            "team_id": "team_01hx",
            "cpu": 4,
            "ram_gb": 16,
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let provisioner = provisioner_for(&server, Some("rollout-secret"));
    provisioner.request(&spec()).await.expect("request accepted");
}

#[tokio::test]
async fn request_surfaces_rollout_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/applications/caphub/namespaces"))
        .respond_with(ResponseTemplate::new(503).set_body_string("sync queue full"))
        .mount(&server)
        .await;

    let provisioner = provisioner_for(&server, None);
    let err = provisioner
        .request(&spec())
        .await
        .expect_err("503 must not pass");
    match err {
        ProvisionerError::UnexpectedStatus { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "sync queue full");
        }
        other => panic!("expected UnexpectedStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn status_classifies_sync_and_health_pairs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/applications/caphub/namespaces/ns-healthy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": {
                "sync": { "status": "Synced" },
                "health": { "status": "Healthy" },
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/applications/caphub/namespaces/ns-degraded"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": {
                "sync": { "status": "Synced" },
                "health": { "status": "Degraded" },
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/applications/caphub/namespaces/ns-converging"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": {
                "sync": { "status": "OutOfSync" },
                "health": { "status": "Progressing" },
            }
        })))
        .mount(&server)
        .await;

    let provisioner = provisioner_for(&server, None);
    assert_eq!(
        provisioner.status("ns-healthy").await.expect("healthy"),
        RolloutStatus::Healthy
    );
    assert_eq!(
        provisioner.status("ns-degraded").await.expect("degraded"),
        RolloutStatus::Failed
    );
    assert_eq!(
        provisioner.status("ns-converging").await.expect("converging"),
        RolloutStatus::Syncing
    );
}

#[tokio::test]
async fn status_tolerates_sparse_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/applications/caphub/namespaces/ns-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let provisioner = provisioner_for(&server, None);
    assert_eq!(
        provisioner.status("ns-new").await.expect("sparse body"),
        RolloutStatus::Syncing
    );
}

#[tokio::test]
async fn teardown_treats_missing_namespaces_as_done() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/applications/caphub/namespaces/ns-gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/applications/caphub/namespaces/ns-live"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/applications/caphub/namespaces/ns-locked"))
        .respond_with(ResponseTemplate::new(403).set_body_string("namespace is protected"))
        .mount(&server)
        .await;

    let provisioner = provisioner_for(&server, None);
    provisioner.teardown("ns-gone").await.expect("404 is done");
    provisioner.teardown("ns-live").await.expect("200 is done");

    let err = provisioner
        .teardown("ns-locked")
        .await
        .expect_err("403 must surface");
    match err {
        ProvisionerError::UnexpectedStatus { status, .. } => assert_eq!(status, 403),
        other => panic!("expected UnexpectedStatus, got {other:?}"),
    }
}
