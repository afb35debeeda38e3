//! MBean ObjectName 과 ObjectName 패턴
//!
//! Key properties keep their registration order: the first key feeds the
//! default metric name and the rest become labels, so the order matters.

use std::fmt;
use std::str::FromStr;

use crate::error::CollectorError;

use super::parser::CollectResult;

/// MBean ObjectName 구조
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectName {
    /// 도메인 (예: "java.lang")
    domain: String,
    /// 등록 순서를 유지하는 key property 목록
    keys: Vec<(String, String)>,
}

impl ObjectName {
    /// 도메인과 key property 목록으로 생성
    pub fn new<D, I, K, V>(domain: D, keys: I) -> CollectResult<Self>
    where
        D: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let domain = domain.into();
        let keys: Vec<(String, String)> = keys
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let name = Self { domain, keys };
        name.validate()?;
        Ok(name)
    }

    /// ObjectName 문자열 파싱
    ///
    /// Quoted values (`name="a,b"`) are kept verbatim, quotes included.
    pub fn parse(s: &str) -> CollectResult<Self> {
        let (domain, properties) = s
            .split_once(':')
            .ok_or_else(|| CollectorError::InvalidObjectName(s.to_string()))?;

        let mut keys = Vec::new();
        for prop in split_properties(properties) {
            let (k, v) = prop
                .split_once('=')
                .ok_or_else(|| CollectorError::InvalidObjectName(s.to_string()))?;
            keys.push((k.to_string(), v.to_string()));
        }

        let name = Self {
            domain: domain.to_string(),
            keys,
        };
        name.validate()
            .map_err(|_| CollectorError::InvalidObjectName(s.to_string()))?;
        Ok(name)
    }

    fn validate(&self) -> CollectResult<()> {
        if self.keys.is_empty() {
            return Err(CollectorError::InvalidObjectName(format!(
                "{}: at least one key property is required",
                self.domain
            )));
        }
        for (index, (key, _)) in self.keys.iter().enumerate() {
            if key.is_empty() {
                return Err(CollectorError::InvalidObjectName(format!(
                    "{}: empty key",
                    self
                )));
            }
            if self.keys[..index].iter().any(|(k, _)| k == key) {
                return Err(CollectorError::InvalidObjectName(format!(
                    "{}: duplicate key '{}'",
                    self, key
                )));
            }
        }
        Ok(())
    }

    /// 도메인
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// 등록 순서의 key property 목록
    pub fn keys(&self) -> &[(String, String)] {
        &self.keys
    }

    /// key property 값 조회
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// key 를 정렬한 canonical 형태 (`domain:a=1,b=2`)
    pub fn canonical(&self) -> String {
        let mut keys: Vec<&(String, String)> = self.keys.iter().collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        let props: Vec<String> = keys.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}:{}", self.domain, props.join(","))
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.domain)?;
        for (index, (k, v)) in self.keys.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

impl FromStr for ObjectName {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// ObjectName 패턴 (`java.lang:*`, `*:type=Memory`, `java.lang:type=GarbageCollector,*`)
///
/// Domain and property values may use `*` and `?` wildcards. A trailing `*`
/// in the property list allows additional keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNamePattern {
    source: String,
    domain: String,
    keys: Vec<(String, String)>,
    property_list_pattern: bool,
}

impl ObjectNamePattern {
    /// 모든 MBean 과 매칭되는 패턴
    pub fn match_all() -> Self {
        Self {
            source: "*:*".to_string(),
            domain: "*".to_string(),
            keys: Vec::new(),
            property_list_pattern: true,
        }
    }

    /// 패턴 문자열 파싱
    pub fn parse(s: &str) -> CollectResult<Self> {
        let (domain, properties) = s
            .split_once(':')
            .ok_or_else(|| CollectorError::InvalidObjectName(s.to_string()))?;

        let mut keys = Vec::new();
        let mut property_list_pattern = false;
        for prop in split_properties(properties) {
            if prop == "*" {
                property_list_pattern = true;
                continue;
            }
            let (k, v) = prop
                .split_once('=')
                .ok_or_else(|| CollectorError::InvalidObjectName(s.to_string()))?;
            keys.push((k.to_string(), v.to_string()));
        }

        if keys.is_empty() && !property_list_pattern {
            return Err(CollectorError::InvalidObjectName(s.to_string()));
        }

        Ok(Self {
            source: s.to_string(),
            domain: domain.to_string(),
            keys,
            property_list_pattern,
        })
    }

    /// 원본 패턴 문자열
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 패턴 매칭 여부
    pub fn matches(&self, name: &ObjectName) -> bool {
        if !glob_match(&self.domain, name.domain()) {
            return false;
        }

        let keys_match = self.keys.iter().all(|(k, pattern)| {
            name.get(k)
                .map(|value| glob_match(pattern, value))
                .unwrap_or(false)
        });
        if !keys_match {
            return false;
        }

        self.property_list_pattern || name.keys().len() == self.keys.len()
    }
}

impl fmt::Display for ObjectNamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split a key property list on commas outside of quoted values
fn split_properties(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (index, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&s[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    if start < s.len() {
        parts.push(&s[start..]);
    }

    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// `*` / `?` wildcard matching
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            pi += 1;
            resume = ti;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ti = resume;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
