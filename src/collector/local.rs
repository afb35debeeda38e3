//! 프로세스 내부 MBean 레지스트리
//!
//! Embedded mode: the host process registers beans here and the exporter
//! walks them without a network hop.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::node::BeanNode;
use super::object_name::{ObjectName, ObjectNamePattern};
use super::parser::CollectResult;
use super::{AttributeRead, ManagementConnection};
use crate::error::CollectorError;

type Reader = Arc<dyn Fn() -> Result<BeanNode, String> + Send + Sync>;

struct Attribute {
    name: String,
    description: Option<String>,
    reader: Reader,
}

/// 속성 목록을 가진 MBean
#[derive(Default)]
pub struct Bean {
    attributes: Vec<Attribute>,
}

impl fmt::Debug for Bean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bean")
            .field(
                "attributes",
                &self.attributes.iter().map(|a| &a.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Bean {
    pub fn new() -> Self {
        Self::default()
    }

    /// 고정 값 속성
    pub fn attribute(self, name: impl Into<String>, value: BeanNode) -> Self {
        self.dynamic(name, move || Ok(value.clone()))
    }

    /// 읽을 때마다 계산되는 속성, `Err` 는 읽기 실패
    pub fn dynamic<F>(mut self, name: impl Into<String>, reader: F) -> Self
    where
        F: Fn() -> Result<BeanNode, String> + Send + Sync + 'static,
    {
        self.attributes.push(Attribute {
            name: name.into(),
            description: None,
            reader: Arc::new(reader),
        });
        self
    }

    /// 마지막으로 추가한 속성에 설명 지정
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        if let Some(last) = self.attributes.last_mut() {
            last.description = Some(description.into());
        }
        self
    }
}

/// In-process bean registry
#[derive(Default)]
pub struct BeanServer {
    beans: RwLock<Vec<(ObjectName, Arc<Bean>)>>,
}

impl fmt::Debug for BeanServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanServer").field("beans", &self.len()).finish()
    }
}

impl BeanServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bean`; a name can be registered only once
    pub fn register(&self, name: ObjectName, bean: Bean) -> CollectResult<()> {
        let mut beans = self.beans.write().unwrap_or_else(PoisonError::into_inner);
        if beans.iter().any(|(existing, _)| *existing == name) {
            return Err(CollectorError::InvalidObjectName(format!(
                "{} is already registered",
                name
            )));
        }
        beans.push((name, Arc::new(bean)));
        Ok(())
    }

    /// Remove a bean, returning whether it was registered
    pub fn unregister(&self, name: &ObjectName) -> bool {
        let mut beans = self.beans.write().unwrap_or_else(PoisonError::into_inner);
        let before = beans.len();
        beans.retain(|(existing, _)| existing != name);
        beans.len() != before
    }

    pub fn len(&self) -> usize {
        self.beans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, name: &ObjectName) -> Option<Arc<Bean>> {
        self.beans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, bean)| Arc::clone(bean))
    }
}

#[async_trait]
impl ManagementConnection for BeanServer {
    fn endpoint(&self) -> &str {
        "local"
    }

    async fn query_names(&self, pattern: &ObjectNamePattern) -> CollectResult<Vec<ObjectName>> {
        Ok(self
            .beans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| pattern.matches(name))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn read_attributes(
        &self,
        name: &ObjectName,
        skip: &HashSet<String>,
    ) -> CollectResult<Vec<AttributeRead>> {
        let bean = self
            .lookup(name)
            .ok_or_else(|| CollectorError::MBeanNotFound(name.to_string()))?;

        Ok(bean
            .attributes
            .iter()
            .filter(|attr| !skip.contains(&attr.name))
            .map(|attr| {
                let value = (attr.reader)().map_err(|reason| CollectorError::AttributeUnreadable {
                    mbean: name.to_string(),
                    attribute: attr.name.clone(),
                    reason,
                });
                AttributeRead::new(attr.name.clone(), value).with_description(attr.description.clone())
            })
            .collect())
    }
}
