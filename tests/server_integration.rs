//! HTTP server integration tests
//!
//! Serves the router on an ephemeral port and talks to it with reqwest.

use std::net::SocketAddr;
use std::sync::Arc;

use rjmx_bridge::collector::{Bean, BeanNode, BeanServer, ObjectName};
use rjmx_bridge::config::Config;
use rjmx_bridge::scrape::ScrapeOrchestrator;
use rjmx_bridge::server::{router, AppState};

const CONFIG: &str = r#"
lowercaseOutputName: true
rules:
  - pattern: 'java.lang<>type=Threading><>ThreadCount'
    name: jvm_threads_current
    type: GAUGE
targets:
  - name: remote
    jolokiaUrl: "http://127.0.0.1:1/jolokia"
"#;

async fn spawn_server() -> SocketAddr {
    let config = Config::from_yaml_str(CONFIG).unwrap();
    let beans = Arc::new(BeanServer::new());
    beans
        .register(
            ObjectName::parse("java.lang:type=Threading").unwrap(),
            Bean::new().attribute("ThreadCount", BeanNode::number(12.0)),
        )
        .unwrap();
    let orchestrator = Arc::new(
        ScrapeOrchestrator::builder(config.clone())
            .bean_server(beans)
            .build()
            .unwrap(),
    );
    let app = router(AppState::new(orchestrator, &config.http_server));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_metrics_over_http() {
    let addr = spawn_server().await;

    let response = reqwest::get(format!("http://{}/metrics", addr))
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain; version=0.0.4"));

    let body = response.text().await.unwrap();
    assert!(body.contains("# TYPE jvm_threads_current gauge"));
    assert!(body.contains("jvm_threads_current 12"));
    assert!(body.contains("jmx_scrape_success 1"));
}

#[tokio::test]
async fn test_unknown_target_is_not_found() {
    let addr = spawn_server().await;

    let response = reqwest::get(format!("http://{}/metrics?target=missing", addr))
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_unreachable_target_reports_failure() {
    let addr = spawn_server().await;

    let body = reqwest::get(format!("http://{}/metrics?target=remote", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("jmx_scrape_success 0"));
    assert!(!body.contains("jvm_threads_current"));
}

#[tokio::test]
async fn test_health_and_landing_page() {
    let addr = spawn_server().await;

    let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let landing = reqwest::get(format!("http://{}/", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(landing.contains("/metrics?target=remote"));
}

#[tokio::test]
async fn test_reload_without_file_fails() {
    let addr = spawn_server().await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/-/reload", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
}
