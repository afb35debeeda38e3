//! Jolokia HTTP 클라이언트
//!
//! Connection pooling과 타임아웃을 지원하는 비동기 HTTP 클라이언트입니다.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::object_name::{ObjectName, ObjectNamePattern};
use super::parser::{
    parse_attribute_list, parse_bulk_response, parse_response, to_bean_node, CollectResult,
    JolokiaResponse,
};
use super::{AttributeRead, ManagementConnection};
use crate::error::CollectorError;

/// Jolokia HTTP 클라이언트
#[derive(Clone)]
pub struct JolokiaClient {
    client: Client,
    base_url: String,
    timeout_ms: u64,
    auth: Option<(String, String)>,
    retry: RetryConfig,
}

/// Jolokia 요청 구조체
#[derive(Debug, Serialize)]
struct JolokiaRequest {
    #[serde(rename = "type")]
    request_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mbean: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<RequestConfig>,
}

/// 요청별 처리 옵션
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestConfig {
    /// false 이면 ObjectName key 순서를 등록 순서대로 유지
    canonical_naming: bool,
}

impl JolokiaRequest {
    fn search(pattern: &str) -> Self {
        Self {
            request_type: "search",
            mbean: Some(pattern.to_string()),
            attribute: None,
            path: None,
            config: Some(RequestConfig {
                canonical_naming: false,
            }),
        }
    }

    fn read(mbean: &str, attribute: Option<&str>) -> Self {
        Self {
            request_type: "read",
            mbean: Some(mbean.to_string()),
            attribute: attribute.map(str::to_string),
            path: None,
            config: None,
        }
    }

    fn list(path: String) -> Self {
        Self {
            request_type: "list",
            mbean: None,
            attribute: None,
            path: Some(path),
            config: None,
        }
    }
}

/// 재시도 설정
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 초기 지연 시간
    pub initial_delay: Duration,
    /// 최대 지연 시간
    pub max_delay: Duration,
    /// 지연 시간 증가 배수
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 재시도 없음
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

impl JolokiaClient {
    /// 새 클라이언트 생성
    ///
    /// # Arguments
    /// * `base_url` - Jolokia 엔드포인트 URL (예: "http://localhost:8778/jolokia")
    /// * `timeout_ms` - 요청 타임아웃 (밀리초)
    pub fn new(base_url: &str, timeout_ms: u64) -> CollectResult<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(CollectorError::HttpClientInit)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms,
            auth: None,
            retry: RetryConfig::default(),
        })
    }

    /// Basic Auth 설정
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some((username.to_string(), password.to_string()));
        self
    }

    /// 열거 요청의 재시도 정책 설정
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 엔드포인트 URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(&self, body: &T) -> CollectResult<String> {
        let mut req = self.client.post(&self.base_url).json(body);

        if let Some((username, password)) = &self.auth {
            req = req.basic_auth(username, Some(password));
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                CollectorError::timeout_with_duration(self.timeout_ms)
            } else {
                CollectorError::from(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CollectorError::AuthenticationFailed);
        }
        if !status.is_success() {
            return Err(CollectorError::HttpStatus(status.as_u16()));
        }

        response.text().await.map_err(CollectorError::HttpResponse)
    }

    /// MBean 목록 조회 (Search)
    #[instrument(skip(self))]
    pub async fn search(&self, pattern: &str) -> CollectResult<Vec<String>> {
        let body = self.post(&JolokiaRequest::search(pattern)).await?;
        let value = parse_response(&body)?.into_value()?;

        match value {
            Value::Array(names) => Ok(names
                .into_iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(CollectorError::JsonParse(format!(
                "search returned {} instead of a list",
                other
            ))),
        }
    }

    /// 재시도 로직이 포함된 Search
    pub async fn search_with_retry(&self, pattern: &str) -> CollectResult<Vec<String>> {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 0;

        loop {
            match self.search(pattern).await {
                Ok(names) => return Ok(names),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Search failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        Duration::from_secs_f64(delay.as_secs_f64() * self.retry.multiplier),
                        self.retry.max_delay,
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// MBean 의 모든 속성을 한 번에 조회
    #[instrument(skip(self), fields(mbean = %mbean))]
    pub async fn read_bean(&self, mbean: &str) -> CollectResult<JolokiaResponse> {
        debug!("Sending Jolokia read request");
        let body = self.post(&JolokiaRequest::read(mbean, None)).await?;
        parse_response(&body)
    }

    /// 속성별 read 요청을 하나의 bulk 요청으로 전송
    #[instrument(skip(self, attributes), fields(mbean = %mbean, count = attributes.len()))]
    pub async fn read_attributes_bulk(
        &self,
        mbean: &str,
        attributes: &[String],
    ) -> CollectResult<Vec<JolokiaResponse>> {
        if attributes.is_empty() {
            return Ok(vec![]);
        }

        let requests: Vec<JolokiaRequest> = attributes
            .iter()
            .map(|attr| JolokiaRequest::read(mbean, Some(attr)))
            .collect();

        let body = self.post(&requests).await?;
        let responses = parse_bulk_response(&body)?;
        if responses.len() != attributes.len() {
            return Err(CollectorError::JsonParse(format!(
                "bulk read returned {} responses for {} requests",
                responses.len(),
                attributes.len()
            )));
        }
        Ok(responses)
    }

    /// MBean 메타데이터 조회 (List)
    #[instrument(skip(self), fields(mbean = %name))]
    pub async fn list_bean(&self, name: &ObjectName) -> CollectResult<Vec<(String, Option<String>)>> {
        let body = self.post(&JolokiaRequest::list(list_path(name))).await?;
        let value = parse_response(&body)?.into_value()?;
        Ok(parse_attribute_list(&value))
    }

    /// 속성별 개별 조회 (읽을 수 없는 속성만 실패)
    async fn read_individually(
        &self,
        name: &ObjectName,
        skip: &HashSet<String>,
    ) -> CollectResult<Vec<AttributeRead>> {
        let mbean = name.to_string();
        let listed: Vec<(String, Option<String>)> = self
            .list_bean(name)
            .await?
            .into_iter()
            .filter(|(attr, _)| !skip.contains(attr))
            .collect();

        let names: Vec<String> = listed.iter().map(|(attr, _)| attr.clone()).collect();
        let responses = self.read_attributes_bulk(&mbean, &names).await?;

        Ok(listed
            .into_iter()
            .zip(responses)
            .map(|((attr, description), response)| {
                let value = if response.is_success() {
                    response.into_value().map(to_bean_node)
                } else {
                    Err(CollectorError::AttributeUnreadable {
                        mbean: mbean.clone(),
                        attribute: attr.clone(),
                        reason: response
                            .error
                            .unwrap_or_else(|| format!("status {}", response.status)),
                    })
                };
                AttributeRead::new(attr, value).with_description(description)
            })
            .collect())
    }
}

#[async_trait]
impl ManagementConnection for JolokiaClient {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn query_names(&self, pattern: &ObjectNamePattern) -> CollectResult<Vec<ObjectName>> {
        let names = self.search_with_retry(pattern.as_str()).await?;

        let mut parsed = Vec::with_capacity(names.len());
        for raw in names {
            match ObjectName::parse(&raw) {
                Ok(name) => parsed.push(name),
                Err(e) => warn!(mbean = %raw, error = %e, "Skipping unparseable ObjectName"),
            }
        }
        Ok(parsed)
    }

    async fn read_attributes(
        &self,
        name: &ObjectName,
        skip: &HashSet<String>,
    ) -> CollectResult<Vec<AttributeRead>> {
        let response = self.read_bean(&name.to_string()).await?;

        if !response.is_success() {
            if response.status == 404 {
                return Err(response.into_error());
            }
            debug!(
                mbean = %name,
                status = response.status,
                error = ?response.error,
                "Reading all attributes failed, falling back to per-attribute reads"
            );
            return self.read_individually(name, skip).await;
        }

        match response.into_value()? {
            Value::Object(attrs) => Ok(attrs
                .into_iter()
                .filter(|(attr, _)| !skip.contains(attr))
                .map(|(attr, value)| AttributeRead::new(attr, Ok(to_bean_node(value))))
                .collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(CollectorError::JsonParse(format!(
                "read of {} returned {} instead of an attribute map",
                name, other
            ))),
        }
    }
}

/// `list` 요청 경로 (`domain/key=value,...`), `!` 와 `/` 는 `!` 로 이스케이프
fn list_path(name: &ObjectName) -> String {
    let escape = |s: &str| s.replace('!', "!!").replace('/', "!/");
    let props: Vec<String> = name
        .keys()
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{}/{}", escape(name.domain()), escape(&props.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_new() {
        let client = JolokiaClient::new("http://localhost:8778/jolokia/", 5000).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8778/jolokia");
    }

    #[test]
    fn test_client_with_auth() {
        let client = JolokiaClient::new("http://localhost:8778/jolokia", 5000)
            .unwrap()
            .with_auth("user", "pass");
        assert!(client.auth.is_some());
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(RetryConfig::none().max_retries, 0);
    }

    #[test]
    fn test_search_request_keeps_key_order() {
        let json = serde_json::to_value(JolokiaRequest::search("*:*")).unwrap();
        assert_eq!(json["type"], "search");
        assert_eq!(json["config"]["canonicalNaming"], false);
        assert!(json.get("attribute").is_none());
    }

    #[test]
    fn test_list_path_escaping() {
        let name = ObjectName::parse("my/domain:type=a!b,name=x/y").unwrap();
        assert_eq!(list_path(&name), "my!/domain/type=a!!b,name=x!/y");
    }
}
