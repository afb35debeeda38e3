//! HTTP request handlers
//!
//! Contains handlers for all HTTP endpoints.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::scrape::EndpointStatus;
use crate::transformer::{PrometheusFormatter, TEXT_CONTENT_TYPE};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    endpoints: Vec<EndpointStatus>,
    reload_success_total: u64,
    reload_failure_total: u64,
}

/// Query string of the metrics endpoint
#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    /// Name of a configured target; absent scrapes the default endpoint
    pub target: Option<String>,
}

/// Root endpoint - displays basic info
pub async fn root(State(state): State<AppState>) -> Html<String> {
    let targets: String = state
        .orchestrator
        .target_names()
        .into_iter()
        .map(|name| {
            let query: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
            format!(
                "        <li><a href=\"{path}?target={query}\">{name}</a></li>\n",
                path = escape_html(&state.metrics_path),
                query = escape_html(&query),
                name = escape_html(name)
            )
        })
        .collect();

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>rJMX-Bridge</title>
</head>
<body>
    <h1>rJMX-Bridge</h1>
    <p>Version: {}</p>
    <ul>
        <li><a href="/health">Health Check</a></li>
        <li><a href="{}">Metrics</a></li>
{}    </ul>
</body>
</html>"#,
        env!("CARGO_PKG_VERSION"),
        escape_html(&state.metrics_path),
        targets
    );
    Html(html)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let reloads = state.orchestrator.reload_stats();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: state.orchestrator.endpoint_status(),
        reload_success_total: reloads.success.get(),
        reload_failure_total: reloads.failure.get(),
    })
}

/// Metrics endpoint - scrapes one endpoint and returns the text exposition format
#[instrument(skip(state), name = "metrics_handler")]
pub async fn metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> AppResult<impl IntoResponse> {
    let _permit = state
        .scrape_permits
        .acquire()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let snapshot = state.orchestrator.scrape(query.target.as_deref()).await?;

    debug!(
        samples = snapshot.len(),
        success = snapshot.success(),
        errors = snapshot.error_count(),
        "Scrape served"
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
        PrometheusFormatter::new().format_snapshot(&snapshot),
    ))
}

/// Reload endpoint - re-reads the configuration file
pub async fn reload(State(state): State<AppState>) -> AppResult<&'static str> {
    state.orchestrator.reload_from_file()?;
    Ok("OK\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Bean, BeanNode, BeanServer, ObjectName};
    use crate::config::{Config, HttpServerConfig};
    use crate::scrape::ScrapeOrchestrator;
    use crate::server::router;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(config_path: Option<&std::path::Path>) -> axum::Router {
        let server = Arc::new(BeanServer::new());
        server
            .register(
                ObjectName::parse("java.lang:type=Threading").unwrap(),
                Bean::new().attribute("ThreadCount", BeanNode::number(12.0)),
            )
            .unwrap();

        let mut builder = ScrapeOrchestrator::builder(Config::default()).bean_server(server);
        if let Some(path) = config_path {
            builder = builder.config_path(path);
        }
        let orchestrator = Arc::new(builder.build().unwrap());
        router(AppState::new(orchestrator, &HttpServerConfig::default()))
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = app(None)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_CONTENT_TYPE);
        let body = body_string(response).await;
        assert!(body.contains("java_lang_Threading_ThreadCount 12\n"));
        assert!(body.contains("jmx_scrape_success 1\n"));
    }

    #[tokio::test]
    async fn test_unknown_target_is_not_found() {
        let response = app(None)
            .oneshot(
                Request::get("/metrics?target=missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("plain"), "plain");
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }

    #[tokio::test]
    async fn test_root_escapes_target_names() {
        let config = Config::from_yaml_str(
            "targets:\n  - name: '<b>x&y</b>'\n    hostPort: \"app:8778\"\n",
        )
        .unwrap();
        let orchestrator = Arc::new(ScrapeOrchestrator::builder(config.clone()).build().unwrap());
        let app = router(AppState::new(orchestrator, &config.http_server));

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_string(response).await;

        assert!(!body.contains("<b>x"));
        assert!(body.contains(">&lt;b&gt;x&amp;y&lt;/b&gt;</a>"));
        assert!(body.contains("/metrics?target=%3Cb%3Ex%26y%3C%2Fb%3E"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app(None)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["endpoints"][0]["name"], "default");
        assert_eq!(json["endpoints"][0]["phase"], "idle");
    }

    #[tokio::test]
    async fn test_reload_without_config_file_fails() {
        let response = app(None)
            .oneshot(
                Request::post("/-/reload")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_reload_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "lowercaseOutputName: true\n").unwrap();

        let app = app(Some(file.path()));
        let response = app
            .clone()
            .oneshot(Request::post("/-/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_string(response).await;
        assert!(body.contains("java_lang_threading_threadcount 12\n"));
        assert!(body.contains("jmx_config_reload_success_total 1\n"));
    }
}
