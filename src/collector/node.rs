//! 속성 값 트리와 평탄화된 leaf
//!
//! `BeanNode` is what a connection hands back for one attribute; the walker
//! flattens it into `BeanLeaf`s, one per scalar reachable from the attribute.

use std::fmt;
use std::sync::Arc;

use super::object_name::ObjectName;

/// Scalar attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl LeafValue {
    /// Numeric form of the value
    ///
    /// Booleans become 1/0 and numeric text is parsed. Anything else is
    /// not representable as a sample.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LeafValue::Number(n) => Some(*n),
            LeafValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            LeafValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Rendering used when the value becomes a label
    pub fn to_label_value(&self) -> String {
        match self {
            LeafValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            LeafValue::Number(n) => n.to_string(),
            LeafValue::Bool(b) => b.to_string(),
            LeafValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for LeafValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_label_value())
    }
}

/// 속성 값 트리
#[derive(Debug, Clone, PartialEq)]
pub enum BeanNode {
    /// 단일 값
    Scalar(LeafValue),
    /// 이름이 있는 필드 묶음 (CompositeData)
    Composite(Vec<(String, BeanNode)>),
    /// 인덱스 컬럼으로 행을 식별하는 표 (TabularData)
    Table {
        index: Vec<String>,
        rows: Vec<Vec<(String, BeanNode)>>,
    },
    /// 배열
    Array(Vec<BeanNode>),
    /// 값 없음
    Null,
    /// 표현할 수 없는 값 (타입 이름)
    Unsupported(String),
}

impl BeanNode {
    pub fn number(value: impl Into<f64>) -> Self {
        BeanNode::Scalar(LeafValue::Number(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        BeanNode::Scalar(LeafValue::Bool(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        BeanNode::Scalar(LeafValue::Text(value.into()))
    }

    pub fn composite<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, BeanNode)>,
        K: Into<String>,
    {
        BeanNode::Composite(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn table<I, R, K>(index: &[&str], rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (K, BeanNode)>,
        K: Into<String>,
    {
        BeanNode::Table {
            index: index.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|(k, v)| (k.into(), v)).collect())
                .collect(),
        }
    }

    pub fn is_structure(&self) -> bool {
        matches!(
            self,
            BeanNode::Composite(_) | BeanNode::Table { .. } | BeanNode::Array(_)
        )
    }
}

/// 하나의 스칼라 값과 그 위치
#[derive(Debug, Clone, PartialEq)]
pub struct BeanLeaf {
    pub object_name: Arc<ObjectName>,
    /// Attribute name followed by composite field names and table column names
    pub attribute_path: Vec<String>,
    /// Labels contributed by table index columns, in discovery order
    pub structural_labels: Vec<(String, String)>,
    pub value: LeafValue,
    pub description: Option<Arc<str>>,
    raw_identity: String,
}

const FIELD_SEP: char = '\u{1f}';
const GROUP_SEP: char = '\u{1e}';

impl BeanLeaf {
    pub fn new(
        object_name: Arc<ObjectName>,
        attribute_path: Vec<String>,
        structural_labels: Vec<(String, String)>,
        value: LeafValue,
        description: Option<Arc<str>>,
    ) -> Self {
        let raw_identity = raw_identity(&object_name, &attribute_path, &structural_labels);
        Self {
            object_name,
            attribute_path,
            structural_labels,
            value,
            description,
            raw_identity,
        }
    }

    pub fn domain(&self) -> &str {
        self.object_name.domain()
    }

    pub fn object_keys(&self) -> &[(String, String)] {
        self.object_name.keys()
    }

    /// Attribute name (first path segment)
    pub fn attribute(&self) -> &str {
        self.attribute_path
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Unambiguous identity covering domain, keys, path and structural labels
    ///
    /// Two leaves with equal identities are the same leaf. Table rows differ
    /// only in their structural labels, so the labels are part of it.
    pub fn raw_identity(&self) -> &str {
        &self.raw_identity
    }
}

fn raw_identity(
    object_name: &ObjectName,
    attribute_path: &[String],
    structural_labels: &[(String, String)],
) -> String {
    let mut out = String::with_capacity(64);
    out.push_str(object_name.domain());
    out.push(GROUP_SEP);
    for (k, v) in object_name.keys() {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push(FIELD_SEP);
    }
    out.push(GROUP_SEP);
    for segment in attribute_path {
        out.push_str(segment);
        out.push(FIELD_SEP);
    }
    out.push(GROUP_SEP);
    let mut labels: Vec<&(String, String)> = structural_labels.iter().collect();
    labels.sort();
    for (k, v) in labels {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push(FIELD_SEP);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(path: &[&str], labels: &[(&str, &str)]) -> BeanLeaf {
        BeanLeaf::new(
            Arc::new(ObjectName::parse("d:type=t").unwrap()),
            path.iter().map(|s| s.to_string()).collect(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            LeafValue::Number(1.0),
            None,
        )
    }

    #[test]
    fn test_leaf_value_coercion() {
        assert_eq!(LeafValue::Number(2.5).as_f64(), Some(2.5));
        assert_eq!(LeafValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(LeafValue::Bool(false).as_f64(), Some(0.0));
        assert_eq!(LeafValue::Text(" 42 ".into()).as_f64(), Some(42.0));
        assert_eq!(LeafValue::Text("RUNNING".into()).as_f64(), None);
    }

    #[test]
    fn test_label_value_rendering() {
        assert_eq!(LeafValue::Number(3.0).to_label_value(), "3");
        assert_eq!(LeafValue::Number(0.5).to_label_value(), "0.5");
        assert_eq!(LeafValue::Bool(true).to_label_value(), "true");
    }

    #[test]
    fn test_raw_identity_distinguishes_rows() {
        let a = leaf(&["Table", "size"], &[("name", "a")]);
        let b = leaf(&["Table", "size"], &[("name", "b")]);
        assert_ne!(a.raw_identity(), b.raw_identity());
    }

    #[test]
    fn test_raw_identity_not_fooled_by_separators_in_names() {
        let a = leaf(&["a_b", "c"], &[]);
        let b = leaf(&["a", "b_c"], &[]);
        assert_ne!(a.raw_identity(), b.raw_identity());
    }

    #[test]
    fn test_raw_identity_independent_of_label_order() {
        let a = leaf(&["T"], &[("x", "1"), ("y", "2")]);
        let b = leaf(&["T"], &[("y", "2"), ("x", "1")]);
        assert_eq!(a.raw_identity(), b.raw_identity());
    }
}
