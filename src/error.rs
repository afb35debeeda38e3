//! Error types for rJMX-Bridge
//!
//! This module defines the error types shared across the collector, the
//! scrape orchestrator and the HTTP layer. Configuration and rule errors live
//! next to the code that produces them (`config`, `transformer::rules`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Collector 모듈 에러 타입
#[derive(Error, Debug)]
pub enum CollectorError {
    /// HTTP 클라이언트 초기화 실패
    #[error("Failed to initialize HTTP client: {0}")]
    HttpClientInit(#[source] reqwest::Error),

    /// HTTP 요청 실패
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[source] reqwest::Error),

    /// HTTP 응답 읽기 실패
    #[error("Failed to read HTTP response: {0}")]
    HttpResponse(#[source] reqwest::Error),

    /// HTTP 상태 코드 에러
    #[error("HTTP error status: {0}")]
    HttpStatus(u16),

    /// JSON 파싱 에러
    #[error("JSON parse error: {0}")]
    JsonParse(String),

    /// Jolokia 에러 응답
    #[error("Jolokia error (status {status}): {message}")]
    JolokiaError { status: u16, message: String },

    /// MBean을 찾을 수 없음
    #[error("MBean not found: {0}")]
    MBeanNotFound(String),

    /// 속성을 읽을 수 없음 (권한, 타임아웃, 사라진 참조)
    #[error("Attribute '{attribute}' of {mbean} is unreadable: {reason}")]
    AttributeUnreadable {
        mbean: String,
        attribute: String,
        reason: String,
    },

    /// 잘못된 ObjectName
    #[error("Invalid ObjectName: {0}")]
    InvalidObjectName(String),

    /// 타임아웃
    /// The value is the configured timeout in milliseconds, if known.
    #[error("Request timed out{}", .0.map(|ms| format!(" after {}ms", ms)).unwrap_or_default())]
    Timeout(Option<u64>),

    /// 연결 실패
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// 인증 실패
    #[error("Authentication failed")]
    AuthenticationFailed,
}

impl CollectorError {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectorError::HttpRequest(_)
                | CollectorError::HttpResponse(_)
                | CollectorError::Timeout(..)
                | CollectorError::ConnectionFailed(_)
                | CollectorError::HttpStatus(500..=599)
        )
    }

    /// 엔드포인트 전체에 영향을 주는 에러인지 확인
    ///
    /// Connection-level failures abort a walk; everything else is scoped to a
    /// single bean or attribute and is skipped.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            CollectorError::HttpClientInit(_)
                | CollectorError::HttpRequest(_)
                | CollectorError::Timeout(..)
                | CollectorError::ConnectionFailed(_)
                | CollectorError::AuthenticationFailed
                | CollectorError::HttpStatus(_)
        )
    }

    /// Create a Timeout error with known duration
    pub fn timeout_with_duration(ms: u64) -> Self {
        CollectorError::Timeout(Some(ms))
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest doesn't expose the configured duration here.
            CollectorError::Timeout(None)
        } else if err.is_connect() {
            CollectorError::ConnectionFailed(err.to_string())
        } else if err.is_request() {
            CollectorError::HttpRequest(err)
        } else {
            CollectorError::HttpResponse(err)
        }
    }
}

/// Errors surfaced by the scrape orchestrator
///
/// A scrape never fails outright: these are recorded against the endpoint and
/// folded into the health metrics of the returned snapshot.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// The walk could not enumerate the endpoint
    #[error("Walk of endpoint '{endpoint}' failed: {source}")]
    Walk {
        endpoint: String,
        #[source]
        source: CollectorError,
    },

    /// Lock wait plus walk plus classify exceeded the configured bound
    #[error("Scrape of endpoint '{endpoint}' timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// No endpoint registered under the requested name
    #[error("Unknown scrape target '{0}'")]
    UnknownTarget(String),
}

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Scrape error that prevented a snapshot from being produced
    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    /// Collector error
    #[error("Collector error: {0}")]
    Collector(#[from] CollectorError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, public_message, log_message) = match self {
            AppError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error",
                e.to_string(),
            ),
            AppError::Scrape(ScrapeError::UnknownTarget(target)) => (
                StatusCode::NOT_FOUND,
                "Unknown target",
                format!("unknown target '{}'", target),
            ),
            AppError::Scrape(e) => (StatusCode::BAD_GATEWAY, "Scrape error", e.to_string()),
            AppError::Collector(e) => (StatusCode::BAD_GATEWAY, "Collector error", e.to_string()),
            AppError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error", e),
        };

        tracing::error!(status = %status, error = %log_message, "Request failed");

        (status, public_message).into_response()
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;
