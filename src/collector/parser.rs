//! Jolokia JSON 응답 파서
//!
//! Jolokia API 응답을 파싱하여 `BeanNode` 트리로 변환합니다.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::node::{BeanNode, LeafValue};
use crate::error::CollectorError;

/// Collector 작업 결과 타입
pub type CollectResult<T> = Result<T, CollectorError>;

/// Jolokia API 응답 구조체
#[derive(Debug, Clone)]
pub struct JolokiaResponse {
    /// 요청 정보
    pub request: RequestInfo,
    /// 응답 값 (원본 JSON)
    pub value: Option<Value>,
    /// 응답 상태 코드
    pub status: u16,
    /// 타임스탬프 (Unix epoch)
    pub timestamp: u64,
    /// 에러 메시지 (실패 시)
    pub error: Option<String>,
    /// 에러 타입 (실패 시)
    pub error_type: Option<String>,
}

/// 요청 정보
#[derive(Debug, Clone, Deserialize)]
pub struct RequestInfo {
    /// MBean ObjectName
    #[serde(default)]
    pub mbean: Option<String>,
    /// 조회한 속성 (단일 또는 복수)
    #[serde(default)]
    pub attribute: Option<Value>,
    /// 요청 타입
    #[serde(rename = "type")]
    pub request_type: String,
}

impl JolokiaResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// 성공 응답의 값, 실패 시 `JolokiaError`
    pub fn into_value(self) -> CollectResult<Value> {
        if !self.is_success() {
            return Err(self.into_error());
        }
        Ok(self.value.unwrap_or(Value::Null))
    }

    /// 실패 응답을 에러로 변환
    pub fn into_error(self) -> CollectorError {
        match self.status {
            401 | 403 => CollectorError::AuthenticationFailed,
            404 => CollectorError::MBeanNotFound(self.request.mbean.unwrap_or_default()),
            status => CollectorError::JolokiaError {
                status,
                message: self
                    .error
                    .or(self.error_type)
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
        }
    }
}

/// 단일 응답 파싱
pub fn parse_response(json: &str) -> CollectResult<JolokiaResponse> {
    let raw: RawJolokiaResponse =
        serde_json::from_str(json).map_err(|e| CollectorError::JsonParse(e.to_string()))?;

    Ok(raw.into())
}

/// Bulk 응답 파싱
pub fn parse_bulk_response(json: &str) -> CollectResult<Vec<JolokiaResponse>> {
    let raw_responses: Vec<RawJolokiaResponse> =
        serde_json::from_str(json).map_err(|e| CollectorError::JsonParse(e.to_string()))?;

    Ok(raw_responses.into_iter().map(Into::into).collect())
}

/// 내부 파싱용 구조체
#[derive(Deserialize)]
struct RawJolokiaResponse {
    request: RequestInfo,
    value: Option<Value>,
    status: u16,
    #[serde(default)]
    timestamp: u64,
    error: Option<String>,
    error_type: Option<String>,
}

impl From<RawJolokiaResponse> for JolokiaResponse {
    fn from(raw: RawJolokiaResponse) -> Self {
        Self {
            request: raw.request,
            value: raw.value,
            status: raw.status,
            timestamp: raw.timestamp,
            error: raw.error,
            error_type: raw.error_type,
        }
    }
}

/// JSON 값을 속성 트리로 변환
pub fn to_bean_node(value: Value) -> BeanNode {
    match value {
        Value::Null => BeanNode::Null,
        Value::Bool(b) => BeanNode::Scalar(LeafValue::Bool(b)),
        Value::Number(n) => match n.as_f64() {
            Some(f) => BeanNode::Scalar(LeafValue::Number(f)),
            None => BeanNode::Unsupported(format!("number {}", n)),
        },
        Value::String(s) => BeanNode::Scalar(LeafValue::Text(s)),
        Value::Array(items) => BeanNode::Array(items.into_iter().map(to_bean_node).collect()),
        Value::Object(map) => match table_index(&map) {
            Some(index) => BeanNode::Table {
                index: vec![index],
                rows: map
                    .into_iter()
                    .filter_map(|(_, row)| match row {
                        Value::Object(fields) => Some(convert_fields(fields)),
                        _ => None,
                    })
                    .collect(),
            },
            None => BeanNode::Composite(convert_fields(map)),
        },
    }
}

fn convert_fields(map: Map<String, Value>) -> Vec<(String, BeanNode)> {
    map.into_iter().map(|(k, v)| (k, to_bean_node(v))).collect()
}

/// Jolokia renders single-index TabularData as `{ "<index value>": { row } }`
///
/// Returns the index column when every row carries a field whose value equals
/// the row's key.
fn table_index(map: &Map<String, Value>) -> Option<String> {
    let mut rows = map.iter();
    let (first_key, first_row) = rows.next()?;
    let first_fields = first_row.as_object()?;

    let candidates: Vec<&String> = first_fields
        .iter()
        .filter(|(_, v)| scalar_text(v).as_deref() == Some(first_key.as_str()))
        .map(|(k, _)| k)
        .collect();

    candidates
        .into_iter()
        .find(|column| {
            map.iter().all(|(key, row)| {
                row.as_object()
                    .and_then(|fields| fields.get(column.as_str()))
                    .and_then(scalar_text)
                    .as_deref()
                    == Some(key.as_str())
            })
        })
        .cloned()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `list` 응답에서 (속성 이름, 설명) 목록 추출
pub fn parse_attribute_list(value: &Value) -> Vec<(String, Option<String>)> {
    value
        .get("attr")
        .and_then(Value::as_object)
        .map(|attrs| {
            attrs
                .iter()
                .map(|(name, info)| {
                    let desc = info
                        .get("desc")
                        .and_then(Value::as_str)
                        .filter(|d| !d.trim().is_empty())
                        .map(str::to_string);
                    (name.clone(), desc)
                })
                .collect()
        })
        .unwrap_or_default()
}
