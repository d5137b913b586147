//! Health and metrics endpoint tests for subscription-service.

mod common;

use common::TestServer;

#[tokio::test]
async fn health_check_returns_ok() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", server.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Invalid JSON body");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "subscription-service");

    server.cleanup().await;
}

#[tokio::test]
async fn readiness_check_returns_ok() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/ready", server.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    server.cleanup().await;
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/metrics", server.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    let body = response.text().await.expect("Failed to read body");
    assert!(body.contains("subscription_db_query_duration_seconds"));

    server.cleanup().await;
}
