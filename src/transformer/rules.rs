//! Rule definitions
//!
//! A `Rule` is one entry of the ordered `rules` list in the configuration. At
//! load time every rule is validated and compiled into a `CompiledRule`; the
//! compiled list is immutable and replaced as a whole on reload.
//!
//! # Example Configuration (YAML)
//!
//! ```yaml
//! rules:
//!   - pattern: 'java.lang<>type=Memory><>HeapMemoryUsage_(\w+)'
//!     name: jvm_memory_heap_$1_bytes
//!     type: GAUGE
//!     help: "JVM heap memory $1"
//!     labels:
//!       area: heap
//!   - pattern: 'org.apache.cassandra.metrics<>type=ColumnFamily.*'
//!     name: ""            # drop these leaves
//! ```

use std::collections::BTreeMap;

use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors that can occur during rule processing
#[derive(Error, Debug)]
pub enum RuleError {
    /// Invalid regex pattern
    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Unsupported Java regex feature
    #[error("Unsupported Java regex feature in pattern '{pattern}': {feature}")]
    UnsupportedJavaFeature { pattern: String, feature: String },

    /// Rule validation error
    #[error("Rule #{index}: {reason}")]
    ValidationError { index: usize, reason: String },
}

/// Result type for rule operations
pub type RuleResult<T> = Result<T, RuleError>;

/// Prometheus metric type
///
/// `UNKNOWN` is accepted as an alias of `UNTYPED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum MetricType {
    /// A value that can go up and down
    Gauge,
    /// A monotonically increasing value
    Counter,
    #[default]
    Untyped,
}

impl MetricType {
    /// Returns the exposition type string
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Untyped => "untyped",
        }
    }

    /// Case-insensitive parse
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gauge" => Some(MetricType::Gauge),
            "counter" => Some(MetricType::Counter),
            "untyped" | "unknown" => Some(MetricType::Untyped),
            _ => None,
        }
    }
}

impl Serialize for MetricType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.as_str().to_ascii_uppercase())
    }
}

impl<'de> Deserialize<'de> for MetricType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MetricType::parse(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown metric type '{}', expected one of: GAUGE, COUNTER, UNTYPED",
                s
            ))
        })
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of the `rules` list
///
/// Templates (`name`, `help`, label names and values, `value`) may reference
/// capture groups of `pattern` as `$1`, `$name` or `${name}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Matched against the canonical leaf string; absent matches everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Metric name template; absent uses default naming, empty drops the leaf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<MetricType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_labels",
        skip_serializing_if = "Option::is_none"
    )]
    pub labels: Option<BTreeMap<String, String>>,

    /// Replaces the attribute value; must parse as a number after substitution
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_factor: Option<f64>,

    /// Match against the snake_cased path and snake_case default names
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub attr_name_snake_case: bool,
}

impl Rule {
    /// Create a rule with a pattern and a name template
    pub fn new(pattern: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Create a new rule builder for fluent configuration
    pub fn builder(pattern: impl Into<String>) -> RuleBuilder {
        RuleBuilder::new(pattern)
    }

    /// Check the rule shape and compile its pattern
    ///
    /// `index` is the rule's position in the list, used in messages.
    pub fn validate(&self, index: usize) -> RuleResult<()> {
        let invalid = |reason: &str| RuleError::ValidationError {
            index,
            reason: reason.to_string(),
        };

        if self.name.is_none() && (self.help.is_some() || self.labels.is_some()) {
            return Err(invalid("Must provide name, if help or labels are given"));
        }
        if self.name.is_some() && self.pattern.is_none() {
            return Err(invalid("Must provide pattern, if name is given"));
        }
        if let Some(factor) = self.value_factor {
            if !factor.is_finite() {
                return Err(invalid("valueFactor must be a finite number"));
            }
        }

        self.compile_pattern().map(|_| ())
    }

    fn compile_pattern(&self) -> RuleResult<Option<Regex>> {
        let Some(pattern) = &self.pattern else {
            return Ok(None);
        };
        let converted = convert_java_regex(pattern)?;
        // Multi-line so `^`/`$` also bound the structural label lines. The
        // padding makes group 0 the whole matched line rather than the match.
        Regex::new(&format!("(?m)^.*(?:{}).*$", converted))
            .map(Some)
            .map_err(|e| RuleError::InvalidPattern {
                pattern: pattern.clone(),
                source: e,
            })
    }
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    value.map(scalar_to_string::<D::Error>).transpose()
}

fn deserialize_labels<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    value
        .map(|map| {
            map.into_iter()
                .map(|(k, v)| Ok((k, scalar_to_string::<D::Error>(v)?)))
                .collect()
        })
        .transpose()
}

fn scalar_to_string<E: serde::de::Error>(value: serde_yaml::Value) -> Result<String, E> {
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(E::custom(format!("expected a scalar, found {:?}", other))),
    }
}

/// Builder for creating rules with a fluent API
#[derive(Debug, Clone, Default)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    /// Create a new builder with the given pattern
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            rule: Rule {
                pattern: Some(pattern.into()),
                ..Rule::default()
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.rule.name = Some(name.into());
        self
    }

    pub fn metric_type(mut self, metric_type: MetricType) -> Self {
        self.rule.metric_type = Some(metric_type);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.rule
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.rule.help = Some(help.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.rule.value = Some(value.into());
        self
    }

    pub fn value_factor(mut self, factor: f64) -> Self {
        self.rule.value_factor = Some(factor);
        self
    }

    pub fn attr_name_snake_case(mut self, enabled: bool) -> Self {
        self.rule.attr_name_snake_case = enabled;
        self
    }

    pub fn build(self) -> Rule {
        self.rule
    }
}

/// Validated rule with its pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub(crate) index: usize,
    pub(crate) pattern: Option<Regex>,
    pub(crate) name: Option<String>,
    pub(crate) metric_type: Option<MetricType>,
    pub(crate) help: Option<String>,
    pub(crate) labels: Vec<(String, String)>,
    pub(crate) value: Option<String>,
    pub(crate) value_factor: f64,
    pub(crate) attr_name_snake_case: bool,
}

impl CompiledRule {
    /// Validate and compile `rule`, the `index`-th entry of the list
    pub fn compile(index: usize, rule: &Rule) -> RuleResult<Self> {
        rule.validate(index)?;
        Ok(Self {
            index,
            pattern: rule.compile_pattern()?,
            name: rule.name.clone(),
            metric_type: rule.metric_type,
            help: rule.help.clone(),
            labels: rule
                .labels
                .iter()
                .flatten()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            value: rule.value.clone(),
            value_factor: rule.value_factor.unwrap_or(1.0),
            attr_name_snake_case: rule.attr_name_snake_case,
        })
    }

    /// Position in the configured list
    pub fn index(&self) -> usize {
        self.index
    }

    /// Match `subject`
    ///
    /// `None` means no match. `Some(None)` is a match by a rule without a
    /// pattern, which has no capture groups.
    pub fn matches<'s>(&self, subject: &'s str) -> Option<Option<Captures<'s>>> {
        match &self.pattern {
            Some(regex) => regex.captures(subject).map(Some),
            None => Some(None),
        }
    }
}

/// Compile a rule list, stopping at the first invalid rule
pub fn compile_rules(rules: &[Rule]) -> RuleResult<Vec<CompiledRule>> {
    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| CompiledRule::compile(index, rule))
        .collect()
}

/// Convert Java regex syntax to Rust regex syntax
///
/// Handles common differences between Java and Rust regex:
/// - Named groups: `(?<name>...)` → `(?P<name>...)`
/// - Possessive quantifiers: `++`, `*+`, `?+` → `+`, `*`, `?` (with warning)
/// - Lookaround and atomic groups are rejected
pub fn convert_java_regex(pattern: &str) -> RuleResult<String> {
    let unsupported = |feature: &str| RuleError::UnsupportedJavaFeature {
        pattern: pattern.to_string(),
        feature: feature.to_string(),
    };

    let mut result = String::with_capacity(pattern.len() + 16);
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' if chars.peek() == Some(&'?') => {
                chars.next();
                match chars.peek() {
                    Some('<') => {
                        chars.next();
                        match chars.peek() {
                            Some('=') => {
                                return Err(unsupported("positive lookbehind assertions (?<=...)"))
                            }
                            Some('!') => {
                                return Err(unsupported("negative lookbehind assertions (?<!...)"))
                            }
                            _ => result.push_str("(?P<"),
                        }
                    }
                    Some('>') => return Err(unsupported("atomic groups (?>...)")),
                    Some('=') => return Err(unsupported("positive lookahead assertions (?=...)")),
                    Some('!') => return Err(unsupported("negative lookahead assertions (?!...)")),
                    _ => result.push_str("(?"),
                }
            }
            '+' | '*' | '?' => {
                result.push(c);
                if chars.peek() == Some(&'+') {
                    chars.next();
                    tracing::warn!(
                        pattern = %pattern,
                        "Possessive quantifier '{}+' converted to '{}' - behavior may differ",
                        c, c
                    );
                }
            }
            '\\' => {
                result.push(c);
                if let Some(escaped) = chars.next() {
                    result.push(escaped);
                }
            }
            _ => result.push(c),
        }
    }

    Ok(result)
}

/// Apply capture group substitution to a template string
///
/// Replaces `$1`, `$name` and `${name}` with the corresponding capture group
/// values; missing groups substitute as empty. Without captures the template
/// is returned unchanged.
pub fn substitute(template: &str, captures: Option<&Captures<'_>>) -> String {
    let Some(captures) = captures else {
        return template.to_string();
    };
    if !template.contains('$') {
        return template.to_string();
    }

    let group = |reference: &str| -> Option<String> {
        let m = match reference.parse::<usize>() {
            Ok(index) => captures.get(index),
            Err(_) => captures.name(reference),
        };
        m.map(|m| m.as_str().to_string())
    };

    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut reference = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    reference.push(next);
                }
                if closed {
                    result.push_str(&group(&reference).unwrap_or_default());
                } else {
                    result.push_str("${");
                    result.push_str(&reference);
                }
            }
            Some(&first) if first.is_ascii_digit() => {
                let mut reference = String::new();
                while let Some(&next) = chars.peek() {
                    if !next.is_ascii_digit() {
                        break;
                    }
                    reference.push(next);
                    chars.next();
                }
                result.push_str(&group(&reference).unwrap_or_default());
            }
            Some(&first) if first.is_alphabetic() => {
                // Letters and digits only, so "$type_$attr" splits at the `_`.
                let mut reference = String::new();
                while let Some(&next) = chars.peek() {
                    if !next.is_alphanumeric() {
                        break;
                    }
                    reference.push(next);
                    chars.next();
                }
                result.push_str(&group(&reference).unwrap_or_default());
            }
            _ => result.push('$'),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captures<'s>(pattern: &str, subject: &'s str) -> Captures<'s> {
        Regex::new(pattern).unwrap().captures(subject).unwrap()
    }

    #[test]
    fn test_metric_type_default() {
        assert_eq!(MetricType::default(), MetricType::Untyped);
    }

    #[test]
    fn test_metric_type_parse_case_insensitive() {
        assert_eq!(MetricType::parse("GAUGE"), Some(MetricType::Gauge));
        assert_eq!(MetricType::parse("Counter"), Some(MetricType::Counter));
        assert_eq!(MetricType::parse("unknown"), Some(MetricType::Untyped));
        assert_eq!(MetricType::parse("histogram"), None);
    }

    #[test]
    fn test_metric_type_serde() {
        let t: MetricType = serde_yaml::from_str("gauge").unwrap();
        assert_eq!(t, MetricType::Gauge);
        assert_eq!(serde_yaml::to_string(&MetricType::Counter).unwrap().trim(), "COUNTER");
        assert!(serde_yaml::from_str::<MetricType>("summary").is_err());
    }

    #[test]
    fn test_rule_deserialize_full() {
        let yaml = r#"
pattern: 'java.lang<>type=(\w+)><>(\w+)'
name: jvm_$1_$2
type: COUNTER
help: "Help for $2"
labels:
  kind: $1
  port: 8080
value: 1
valueFactor: 0.001
attrNameSnakeCase: true
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.name.as_deref(), Some("jvm_$1_$2"));
        assert_eq!(rule.metric_type, Some(MetricType::Counter));
        assert_eq!(rule.value.as_deref(), Some("1"));
        assert_eq!(rule.value_factor, Some(0.001));
        assert!(rule.attr_name_snake_case);
        let labels = rule.labels.unwrap();
        assert_eq!(labels.get("port").map(String::as_str), Some("8080"));
    }

    #[test]
    fn test_rule_deserialize_empty_name_is_kept() {
        let rule: Rule = serde_yaml::from_str("pattern: 'a.*'\nname: ''").unwrap();
        assert_eq!(rule.name.as_deref(), Some(""));
        assert!(rule.validate(0).is_ok());
    }

    #[test]
    fn test_rule_validate_shape() {
        let help_without_name = Rule {
            help: Some("h".into()),
            ..Rule::default()
        };
        let err = help_without_name.validate(3).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Rule #3: Must provide name, if help or labels are given"
        );

        let name_without_pattern = Rule {
            name: Some("n".into()),
            ..Rule::default()
        };
        assert_eq!(
            name_without_pattern.validate(0).unwrap_err().to_string(),
            "Rule #0: Must provide pattern, if name is given"
        );

        assert!(Rule::default().validate(0).is_ok());
    }

    #[test]
    fn test_rule_validate_value_factor() {
        let rule = Rule::builder("x").name("y").value_factor(f64::NAN).build();
        assert!(rule.validate(0).is_err());
    }

    #[test]
    fn test_rule_validate_invalid_pattern() {
        let rule = Rule::new("[unclosed", "x");
        assert!(matches!(rule.validate(0), Err(RuleError::InvalidPattern { .. })));
    }

    #[test]
    fn test_rule_builder() {
        let rule = Rule::builder(r"test<>(\w+)")
            .name("test_$1")
            .metric_type(MetricType::Counter)
            .label("env", "prod")
            .help("Test metric")
            .value_factor(0.001)
            .build();

        assert_eq!(rule.pattern.as_deref(), Some(r"test<>(\w+)"));
        assert_eq!(rule.metric_type, Some(MetricType::Counter));
        assert_eq!(rule.labels.unwrap().get("env"), Some(&"prod".to_string()));
    }

    #[test]
    fn test_compiled_rule_multiline_anchors() {
        let compiled = CompiledRule::compile(0, &Rule::new(r"^d<>t=x><>A$", "a")).unwrap();
        assert!(compiled.matches("d<>t=x><>A\nname=row").is_some());
        assert!(compiled.matches("d<>t=x><>AB").is_none());
    }

    #[test]
    fn test_compiled_rule_without_pattern_matches_everything() {
        let compiled = CompiledRule::compile(0, &Rule::default()).unwrap();
        assert!(matches!(compiled.matches("anything"), Some(None)));
        assert_eq!(compiled.value_factor, 1.0);
    }

    #[test]
    fn test_compile_rules_reports_first_invalid() {
        let rules = vec![Rule::new("ok", "a"), Rule::new("(", "b")];
        assert!(compile_rules(&rules).is_err());
        assert_eq!(compile_rules(&rules[..1]).unwrap().len(), 1);
    }

    #[test]
    fn test_convert_java_regex_named_group() {
        let result = convert_java_regex(r"(?<type>\w+)<(?<attr>\w+)>").unwrap();
        assert_eq!(result, r"(?P<type>\w+)<(?P<attr>\w+)>");
    }

    #[test]
    fn test_convert_java_regex_non_capturing_group() {
        assert_eq!(convert_java_regex(r"(?:abc)+").unwrap(), r"(?:abc)+");
    }

    #[test]
    fn test_convert_java_regex_lookaround_rejected() {
        for pattern in [r"foo(?=bar)", r"foo(?!bar)", r"(?<=foo)bar", r"(?<!foo)bar", r"(?>a)"] {
            assert!(matches!(
                convert_java_regex(pattern),
                Err(RuleError::UnsupportedJavaFeature { .. })
            ));
        }
    }

    #[test]
    fn test_convert_java_regex_possessive_quantifiers() {
        assert_eq!(convert_java_regex(r"a++").unwrap(), r"a+");
        assert_eq!(convert_java_regex(r"a*+").unwrap(), r"a*");
        assert_eq!(convert_java_regex(r"a?+").unwrap(), r"a?");
    }

    #[test]
    fn test_convert_java_regex_escape_sequences() {
        assert_eq!(convert_java_regex(r"a\.b\(c\)").unwrap(), r"a\.b\(c\)");
    }

    #[test]
    fn test_substitute_numeric_and_zero() {
        let caps = captures(r"(\w+)-(\w+)", "abc-def");
        assert_eq!(substitute("x_$1_$2", Some(&caps)), "x_abc_def");
        assert_eq!(substitute("all_$0", Some(&caps)), "all_abc-def");
    }

    #[test]
    fn test_group_zero_is_whole_line() {
        let rule = CompiledRule::compile(0, &Rule::new(r"(\w+)-(\w+)", "x")).unwrap();
        let caps = rule.matches("pre abc-def post").unwrap().unwrap();
        assert_eq!(substitute("all_$0", Some(&caps)), "all_pre abc-def post");
        assert_eq!(substitute("x_$1_$2", Some(&caps)), "x_abc_def");

        let anchored = CompiledRule::compile(0, &Rule::new(r"^abc$|^xyz", "x")).unwrap();
        assert!(anchored.matches("xyz-1").is_some());
        assert!(anchored.matches("abc\nsource=a").is_some());
        assert!(anchored.matches("zabc").is_none());
    }

    #[test]
    fn test_substitute_named() {
        let caps = captures(r"(?P<type>\w+)<>(?P<attr>\w+)", "Memory<>Heap");
        assert_eq!(substitute("$type_$attr", Some(&caps)), "Memory_Heap");
        assert_eq!(substitute("${type}Usage", Some(&caps)), "MemoryUsage");
    }

    #[test]
    fn test_substitute_missing_group_is_empty() {
        let caps = captures(r"(\w+)", "abc");
        assert_eq!(substitute("x_$5_y", Some(&caps)), "x__y");
        assert_eq!(substitute("${nope}", Some(&caps)), "");
    }

    #[test]
    fn test_substitute_literal_dollar() {
        let caps = captures(r"(\w+)", "abc");
        assert_eq!(substitute("cost $", Some(&caps)), "cost $");
        assert_eq!(substitute("${unclosed", Some(&caps)), "${unclosed");
        assert_eq!(substitute("$1", None), "$1");
    }
}
