//! Management bean 수집 모듈
//!
//! 하나의 엔드포인트에서 MBean 을 열거하고 속성을 읽어 `BeanLeaf` 로
//! 평탄화합니다. 엔드포인트는 `ManagementConnection` 으로 추상화되며
//! 원격 Jolokia 에이전트(`JolokiaClient`)와 프로세스 내부 레지스트리
//! (`BeanServer`) 두 가지 구현이 있습니다.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rjmx_bridge::collector::{BeanWalk, JolokiaClient, WalkOptions, AutoExclusions};
//!
//! let client = Arc::new(JolokiaClient::new("http://localhost:8778/jolokia", 5000)?);
//! let mut walk = BeanWalk::new(client, Arc::new(WalkOptions::default()), Arc::default());
//! while let Some(leaf) = walk.next().await? {
//!     println!("{:?}", leaf.attribute_path);
//! }
//! ```

use std::collections::HashSet;

use async_trait::async_trait;

mod client;
mod local;
mod node;
mod object_name;
mod parser;
mod walker;

pub use client::{JolokiaClient, RetryConfig};
pub use local::{Bean, BeanServer};
pub use node::{BeanLeaf, BeanNode, LeafValue};
pub use object_name::{ObjectName, ObjectNamePattern};
pub use parser::{
    parse_attribute_list, parse_bulk_response, parse_response, to_bean_node, CollectResult,
    JolokiaResponse, RequestInfo,
};
pub use walker::{AutoExclusions, BeanWalk, WalkOptions, WalkStats};

/// 하나의 속성 읽기 결과
#[derive(Debug)]
pub struct AttributeRead {
    pub name: String,
    pub description: Option<String>,
    pub value: CollectResult<BeanNode>,
}

impl AttributeRead {
    pub fn new(name: impl Into<String>, value: CollectResult<BeanNode>) -> Self {
        Self {
            name: name.into(),
            description: None,
            value,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// 관리 엔드포인트 연결
///
/// A connection is used by at most one walk at a time; the scrape
/// orchestrator serializes access per endpoint.
#[async_trait]
pub trait ManagementConnection: Send + Sync {
    /// 로그와 헬스 메트릭에 쓰이는 엔드포인트 식별자
    fn endpoint(&self) -> &str;

    /// 패턴과 매칭되는 MBean 이름 조회
    async fn query_names(&self, pattern: &ObjectNamePattern) -> CollectResult<Vec<ObjectName>>;

    /// MBean 의 읽을 수 있는 속성을 모두 읽기
    ///
    /// Attributes named in `skip` are not read. A failure that concerns the
    /// whole bean is an `Err`; a single unreadable attribute is reported in
    /// its `AttributeRead`.
    async fn read_attributes(
        &self,
        name: &ObjectName,
        skip: &HashSet<String>,
    ) -> CollectResult<Vec<AttributeRead>>;
}
