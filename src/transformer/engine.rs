//! Rule Engine - BeanLeaf to Sample classification
//!
//! Each leaf is canonicalized, matched against the compiled rules in
//! declaration order and turned into at most one `Sample`. The first matching
//! rule wins; when none matches the leaf is named by the default scheme.
//! Everything but the numeric value is cached per raw identity.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::collector::{BeanLeaf, LeafValue};
use crate::config::Config;
use crate::snapshot::Sample;

use super::cache::{RuleCache, UNSCOPED};
use super::naming::{
    canonical_string, default_help, default_labels, default_metric_name, safe_label_name,
    safe_name,
};
use super::rules::{compile_rules, substitute, CompiledRule, MetricType, Rule, RuleResult};

/// Cached classification of one raw identity
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A rule resolved the name to empty
    Excluded,
    /// The rule's `value` template did not produce a number
    InvalidValue { rule: usize, value: Arc<str> },
    Export(Arc<ResolvedMetric>),
}

/// Everything about a sample except its value
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetric {
    /// Index of the matching rule, `None` for the no-match fallback
    pub rule: Option<usize>,
    pub name: String,
    pub metric_type: MetricType,
    pub help: String,
    pub labels: BTreeMap<String, String>,
    pub value_factor: f64,
    /// Value from the rule's `value` template
    pub fixed_value: Option<f64>,
}

impl ResolvedMetric {
    /// Instantiate with the leaf's current value
    ///
    /// Booleans become 1/0 and are not scaled. Text that is not a number
    /// yields `None`.
    pub fn sample(&self, value: &LeafValue) -> Option<Sample> {
        let value = match (self.fixed_value, value) {
            (Some(fixed), _) => fixed * self.value_factor,
            (None, LeafValue::Bool(b)) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            (None, other) => other.as_f64()? * self.value_factor,
        };

        Some(Sample {
            name: self.name.clone(),
            metric_type: self.metric_type,
            help: self.help.clone(),
            labels: self.labels.clone(),
            value,
        })
    }
}

/// Per-session counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyStats {
    pub hits: u64,
    pub misses: u64,
    pub excluded: u64,
    /// Leaves whose value could not be turned into a number
    pub dropped_values: u64,
}

/// Compiled rules plus the name-resolution cache
///
/// The engine is immutable once built. A configuration reload builds a new
/// engine, which comes with an empty cache.
#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
    lowercase_names: bool,
    lowercase_labels: bool,
    attr_name_snake_case: bool,
    default_type: MetricType,
    cache: RuleCache,
}

impl RuleEngine {
    /// Compile `rules` into a new engine
    ///
    /// # Errors
    ///
    /// Returns the first rule that fails validation or compilation.
    pub fn new(rules: &[Rule]) -> RuleResult<Self> {
        Ok(Self {
            rules: compile_rules(rules)?,
            lowercase_names: false,
            lowercase_labels: false,
            attr_name_snake_case: false,
            default_type: MetricType::Untyped,
            cache: RuleCache::new(),
        })
    }

    /// Engine without rules; every leaf gets default naming
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            lowercase_names: false,
            lowercase_labels: false,
            attr_name_snake_case: false,
            default_type: MetricType::Untyped,
            cache: RuleCache::new(),
        }
    }

    /// Build an engine from the rule and naming settings of `config`
    pub fn from_config(config: &Config) -> RuleResult<Self> {
        Ok(Self::new(&config.rules)?
            .with_lowercase_names(config.lowercase_output_name)
            .with_lowercase_labels(config.lowercase_output_label_names)
            .with_attr_name_snake_case(config.attr_name_snake_case)
            .with_default_type(config.default_type))
    }

    /// Set whether to lowercase metric names
    pub fn with_lowercase_names(mut self, lowercase: bool) -> Self {
        self.lowercase_names = lowercase;
        self
    }

    /// Set whether to lowercase label names
    pub fn with_lowercase_labels(mut self, lowercase: bool) -> Self {
        self.lowercase_labels = lowercase;
        self
    }

    /// Snake-case attribute names when no rule matches
    pub fn with_attr_name_snake_case(mut self, enabled: bool) -> Self {
        self.attr_name_snake_case = enabled;
        self
    }

    /// Type for rules without `type` and for unmatched leaves
    pub fn with_default_type(mut self, metric_type: MetricType) -> Self {
        self.default_type = metric_type;
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Start classifying leaves outside any endpoint scope
    pub fn session(&self) -> ClassifySession<'_> {
        self.scoped_session(UNSCOPED)
    }

    /// Start classifying the leaves of one scrape of the endpoint `scope`
    pub fn scoped_session<'a>(&'a self, scope: &'a str) -> ClassifySession<'a> {
        ClassifySession {
            engine: self,
            scope,
            cached: self.cache.snapshot(scope),
            pending: HashMap::new(),
            seen: HashSet::new(),
            stats: ClassifyStats::default(),
        }
    }

    /// Classify a single leaf in its own session
    pub fn classify(&self, leaf: &BeanLeaf) -> Option<Sample> {
        let mut session = self.session();
        let sample = session.classify(leaf);
        session.finish();
        sample
    }

    /// Evaluate the rules for `leaf`, bypassing the cache
    pub fn evaluate(&self, leaf: &BeanLeaf) -> Outcome {
        let canonical = canonical_string(leaf, false);
        let mut snake_cased: Option<String> = None;

        for rule in &self.rules {
            let subject = if rule.attr_name_snake_case {
                snake_cased
                    .get_or_insert_with(|| canonical_string(leaf, true))
                    .as_str()
            } else {
                canonical.as_str()
            };

            let Some(captures) = rule.matches(subject) else {
                continue;
            };
            let captures = captures.as_ref();

            let fixed_value = match &rule.value {
                Some(template) => {
                    let raw = substitute(template, captures);
                    match raw.trim().parse::<f64>() {
                        Ok(v) => Some(v),
                        Err(_) => {
                            return Outcome::InvalidValue {
                                rule: rule.index(),
                                value: Arc::from(raw),
                            }
                        }
                    }
                }
                None => None,
            };
            let metric_type = rule.metric_type.unwrap_or(self.default_type);

            let Some(name_template) = &rule.name else {
                return Outcome::Export(Arc::new(self.default_metric(
                    leaf,
                    rule.attr_name_snake_case,
                    metric_type,
                    Some(rule.index()),
                    rule.value_factor,
                    fixed_value,
                )));
            };

            let name = safe_name(&substitute(name_template, captures));
            if name.is_empty() {
                return Outcome::Excluded;
            }

            let mut labels = BTreeMap::new();
            for (k, v) in &leaf.structural_labels {
                self.insert_label(&mut labels, k, v.clone(), false);
            }
            for (k, v) in &rule.labels {
                let label_name = substitute(k, captures);
                let label_value = substitute(v, captures);
                self.insert_label(&mut labels, &label_name, label_value, true);
            }

            let help = rule
                .help
                .as_deref()
                .map(|h| substitute(h, captures))
                .unwrap_or_else(|| default_help(leaf));

            return Outcome::Export(Arc::new(ResolvedMetric {
                rule: Some(rule.index()),
                name: self.metric_name(name),
                metric_type,
                help,
                labels,
                value_factor: rule.value_factor,
                fixed_value,
            }));
        }

        Outcome::Export(Arc::new(self.default_metric(
            leaf,
            self.attr_name_snake_case,
            self.default_type,
            None,
            1.0,
            None,
        )))
    }

    fn default_metric(
        &self,
        leaf: &BeanLeaf,
        snake_case: bool,
        metric_type: MetricType,
        rule: Option<usize>,
        value_factor: f64,
        fixed_value: Option<f64>,
    ) -> ResolvedMetric {
        let mut labels = BTreeMap::new();
        for (k, v) in default_labels(leaf) {
            self.insert_label(&mut labels, k, v.to_string(), false);
        }

        ResolvedMetric {
            rule,
            name: self.metric_name(default_metric_name(leaf, snake_case)),
            metric_type,
            help: default_help(leaf),
            labels,
            value_factor,
            fixed_value,
        }
    }

    fn metric_name(&self, name: String) -> String {
        if self.lowercase_names {
            name.to_lowercase()
        } else {
            name
        }
    }

    /// Empty names or values are skipped; `overwrite` decides key collisions
    fn insert_label(
        &self,
        labels: &mut BTreeMap<String, String>,
        raw_name: &str,
        value: String,
        overwrite: bool,
    ) {
        let mut name = safe_label_name(raw_name);
        if self.lowercase_labels {
            name = name.to_lowercase();
        }
        if name.is_empty() || value.is_empty() {
            return;
        }
        if overwrite {
            labels.insert(name, value);
        } else {
            labels.entry(name).or_insert(value);
        }
    }
}

/// Classification of one scrape's leaves against a fixed cache snapshot
///
/// New outcomes are buffered and published to the cache by `finish`.
pub struct ClassifySession<'a> {
    engine: &'a RuleEngine,
    scope: &'a str,
    cached: Arc<HashMap<String, Outcome>>,
    pending: HashMap<String, Outcome>,
    seen: HashSet<String>,
    stats: ClassifyStats,
}

impl ClassifySession<'_> {
    pub fn classify(&mut self, leaf: &BeanLeaf) -> Option<Sample> {
        let key = leaf.raw_identity();
        self.seen.insert(key.to_string());

        let hit = self
            .cached
            .get(key)
            .or_else(|| self.pending.get(key))
            .cloned();
        let outcome = match hit {
            Some(outcome) => {
                self.stats.hits += 1;
                outcome
            }
            None => {
                self.stats.misses += 1;
                let outcome = self.engine.evaluate(leaf);
                self.pending.insert(key.to_string(), outcome.clone());
                outcome
            }
        };

        match outcome {
            Outcome::Excluded => {
                self.stats.excluded += 1;
                None
            }
            Outcome::InvalidValue { rule, value } => {
                self.stats.dropped_values += 1;
                debug!(rule, value = %value, "Rule value is not a number");
                None
            }
            Outcome::Export(metric) => {
                let sample = metric.sample(&leaf.value);
                if sample.is_none() {
                    self.stats.dropped_values += 1;
                }
                sample
            }
        }
    }

    pub fn stats(&self) -> ClassifyStats {
        self.stats
    }

    /// Publish new outcomes to the cache
    pub fn finish(self) -> ClassifyStats {
        self.engine.cache.commit(self.scope, self.pending, None);
        self.stats
    }

    /// Publish new outcomes and evict identities of this scope the session
    /// did not see
    ///
    /// Only meaningful after a complete walk.
    pub fn finish_and_evict(self) -> ClassifyStats {
        self.engine
            .cache
            .commit(self.scope, self.pending, Some(&self.seen));
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ObjectName;
    use crate::transformer::rules::RuleBuilder;

    fn leaf(object_name: &str, path: &[&str], labels: &[(&str, &str)], value: LeafValue) -> BeanLeaf {
        BeanLeaf::new(
            Arc::new(ObjectName::parse(object_name).unwrap()),
            path.iter().map(|s| s.to_string()).collect(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
            None,
        )
    }

    fn num(object_name: &str, path: &[&str], value: f64) -> BeanLeaf {
        leaf(object_name, path, &[], LeafValue::Number(value))
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let engine = RuleEngine::new(&[
            Rule::new(r"java\.lang<>type=Memory><>(\w+)_used", "first_$1"),
            Rule::new(r".*", "second"),
        ])
        .unwrap();

        let sample = engine
            .classify(&num("java.lang:type=Memory", &["HeapMemoryUsage", "used"], 5.0))
            .unwrap();
        assert_eq!(sample.name, "first_HeapMemoryUsage");
        assert_eq!(sample.value, 5.0);
    }

    #[test]
    fn test_group_zero_names_whole_canonical_line() {
        let engine = RuleEngine::new(&[Rule::new("Memory", "x_$0")]).unwrap();
        let sample = engine
            .classify(&num("java.lang:type=Memory", &["HeapMemoryUsage", "used"], 1.0))
            .unwrap();
        assert_eq!(sample.name, "x_java_lang_type_Memory_HeapMemoryUsage_used");
    }

    #[test]
    fn test_empty_name_drops_without_fallthrough() {
        let engine = RuleEngine::new(&[Rule::new("a.*", ""), Rule::new(".*", "fallback_$0")]).unwrap();

        assert!(engine.classify(&num("a:type=x", &["V"], 1.0)).is_none());
        let other = engine.classify(&num("b:type=x", &["V"], 1.0)).unwrap();
        assert!(other.name.starts_with("fallback_"));
    }

    #[test]
    fn test_tabular_rows_named_by_rule() {
        let engine = RuleEngine::new(&[Rule::new(
            r"io\.prometheus\.jmx<>type=tabularData><>Table_(.+)",
            "io_prometheus_jmx_tabularData_Table_$1",
        )])
        .unwrap();

        let a = engine
            .classify(&leaf(
                "io.prometheus.jmx:type=tabularData",
                &["Table", "size"],
                &[("source", "/dev/sda1")],
                LeafValue::Number(7516192768.0),
            ))
            .unwrap();
        let b = engine
            .classify(&leaf(
                "io.prometheus.jmx:type=tabularData",
                &["Table", "size"],
                &[("source", "/dev/sda2")],
                LeafValue::Number(15032385536.0),
            ))
            .unwrap();

        assert_eq!(a.name, "io_prometheus_jmx_tabularData_Table_size");
        assert_eq!(b.name, a.name);
        assert_eq!(a.labels, labels(&[("source", "/dev/sda1")]));
        assert_eq!(b.labels, labels(&[("source", "/dev/sda2")]));
        assert_eq!(a.value, 7.516192768e9);
        assert_eq!(b.value, 1.5032385536e10);
    }

    #[test]
    fn test_cache_hit_reuses_name_and_reads_new_value() {
        let engine = RuleEngine::new(&[Rule::new(r"d<>type=(\w+)><>(\w+)", "d_$1_$2")]).unwrap();

        let mut session = engine.session();
        let first = session.classify(&num("d:type=t", &["A"], 1.0)).unwrap();
        session.finish();

        let mut session = engine.session();
        let second = session.classify(&num("d:type=t", &["A"], 2.0)).unwrap();
        let stats = session.finish();

        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(first.name, second.name);
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.metric_type, second.metric_type);
        assert_eq!(second.value, 2.0);
    }

    #[test]
    fn test_fallback_default_naming() {
        let engine = RuleEngine::empty();
        let sample = engine
            .classify(&num(
                "hadoop:service=DataNode,name=DataNodeActivity-ams",
                &["replaceBlockOpMinTime"],
                200.0,
            ))
            .unwrap();

        assert_eq!(sample.name, "hadoop_DataNode_replaceBlockOpMinTime");
        assert_eq!(sample.metric_type, MetricType::Untyped);
        assert_eq!(sample.labels, labels(&[("name", "DataNodeActivity-ams")]));
        assert!(sample.help.contains("hadoop<>service=DataNode, name=DataNodeActivity-ams"));
    }

    #[test]
    fn test_fallback_lowercase_and_snake_case() {
        let engine = RuleEngine::empty()
            .with_lowercase_names(true)
            .with_lowercase_labels(true)
            .with_attr_name_snake_case(true);
        let sample = engine
            .classify(&num("Hadoop:service=DataNode,Name=X", &["replaceBlockOpMinTime"], 1.0))
            .unwrap();
        assert_eq!(sample.name, "hadoop_datanode_replace_block_op_min_time");
        assert_eq!(sample.labels, labels(&[("name", "X")]));
    }

    #[test]
    fn test_rule_without_name_uses_default_naming_with_rule_settings() {
        let rule = RuleBuilder::new(r"java\.lang<>type=Threading.*")
            .metric_type(MetricType::Gauge)
            .value_factor(2.0)
            .build();
        let engine = RuleEngine::new(&[rule]).unwrap();

        let sample = engine
            .classify(&num("java.lang:type=Threading", &["ThreadCount"], 21.0))
            .unwrap();
        assert_eq!(sample.name, "java_lang_Threading_ThreadCount");
        assert_eq!(sample.metric_type, MetricType::Gauge);
        assert_eq!(sample.value, 42.0);
    }

    #[test]
    fn test_rule_labels_override_structural_labels() {
        let rule = RuleBuilder::new(r"d<>type=t><>T_(\w+)\nname=(\w+)")
            .name("t_$1")
            .label("name", "row_$2")
            .label("kind", "$1")
            .label("$2", "")
            .build();
        let engine = RuleEngine::new(&[rule]).unwrap();

        let sample = engine
            .classify(&leaf("d:type=t", &["T", "size"], &[("name", "a")], LeafValue::Number(1.0)))
            .unwrap();
        assert_eq!(sample.labels, labels(&[("kind", "size"), ("name", "row_a")]));
    }

    #[test]
    fn test_help_and_type_templates() {
        let rule = RuleBuilder::new(r"d<>type=(\w+)><>(\w+)")
            .name("d_$2")
            .help("$2 of $1")
            .metric_type(MetricType::Counter)
            .build();
        let engine = RuleEngine::new(&[rule]).unwrap();

        let sample = engine.classify(&num("d:type=t", &["Count"], 1.0)).unwrap();
        assert_eq!(sample.help, "Count of t");
        assert_eq!(sample.metric_type, MetricType::Counter);
    }

    #[test]
    fn test_default_type_applies_to_rules_without_type() {
        let engine = RuleEngine::new(&[Rule::new(".*", "x")])
            .unwrap()
            .with_default_type(MetricType::Gauge);
        let sample = engine.classify(&num("d:type=t", &["A"], 1.0)).unwrap();
        assert_eq!(sample.metric_type, MetricType::Gauge);
    }

    #[test]
    fn test_value_template_and_factor() {
        let rule = RuleBuilder::new(r"d<>type=t><>State")
            .name("state_up")
            .value("1")
            .value_factor(0.5)
            .build();
        let engine = RuleEngine::new(&[rule]).unwrap();

        let sample = engine
            .classify(&leaf("d:type=t", &["State"], &[], LeafValue::Text("RUNNING".into())))
            .unwrap();
        assert_eq!(sample.value, 0.5);
    }

    #[test]
    fn test_value_template_not_a_number_drops() {
        let rule = RuleBuilder::new(r"d<>type=t><>(\w+)")
            .name("x")
            .value("$1")
            .build();
        let engine = RuleEngine::new(&[rule]).unwrap();

        let mut session = engine.session();
        assert!(session.classify(&num("d:type=t", &["State"], 1.0)).is_none());
        assert_eq!(session.stats().dropped_values, 1);
    }

    #[test]
    fn test_boolean_and_text_values() {
        let engine = RuleEngine::new(&[Rule {
            value_factor: Some(10.0),
            ..Rule::default()
        }])
        .unwrap();

        let b = engine
            .classify(&leaf("d:type=t", &["On"], &[], LeafValue::Bool(true)))
            .unwrap();
        assert_eq!(b.value, 1.0);

        let t = engine
            .classify(&leaf("d:type=t", &["N"], &[], LeafValue::Text("3".into())))
            .unwrap();
        assert_eq!(t.value, 30.0);

        let mut session = engine.session();
        assert!(session
            .classify(&leaf("d:type=t", &["S"], &[], LeafValue::Text("RUNNING".into())))
            .is_none());
        assert_eq!(session.stats().dropped_values, 1);
    }

    #[test]
    fn test_name_is_sanitized() {
        let engine = RuleEngine::new(&[Rule::new(r"d<>type=(.+)><>.*", "my-$1 metric")]).unwrap();
        let sample = engine.classify(&num("d:type=a.b", &["A"], 1.0)).unwrap();
        assert_eq!(sample.name, "my_a_b_metric");
    }

    #[test]
    fn test_snake_case_rule_matches_snake_cased_path() {
        let rule = RuleBuilder::new(r"d<>type=t><>heap_memory_usage_(\w+)")
            .name("heap_$1")
            .attr_name_snake_case(true)
            .build();
        let engine = RuleEngine::new(&[rule]).unwrap();
        let sample = engine
            .classify(&num("d:type=t", &["HeapMemoryUsage", "used"], 1.0))
            .unwrap();
        assert_eq!(sample.name, "heap_used");
    }

    #[test]
    fn test_finish_and_evict_drops_unseen_identities() {
        let engine = RuleEngine::empty();
        let mut session = engine.session();
        session.classify(&num("d:type=t", &["A"], 1.0));
        session.classify(&num("d:type=t", &["B"], 1.0));
        session.finish();
        assert_eq!(engine.cache().len(), 2);

        let mut session = engine.session();
        session.classify(&num("d:type=t", &["A"], 1.0));
        session.finish_and_evict();
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn test_eviction_leaves_other_scopes_alone() {
        let engine = RuleEngine::empty();
        let mut pool = engine.scoped_session("pool");
        pool.classify(&num("pool:type=p", &["A"], 1.0));
        pool.classify(&num("pool:type=p", &["B"], 1.0));
        pool.finish_and_evict();

        let mut local = engine.scoped_session("default");
        local.classify(&num("d:type=t", &["A"], 1.0));
        local.finish_and_evict();

        assert_eq!(engine.cache().scope_len("pool"), 2);
        assert_eq!(engine.cache().len(), 3);

        let mut pool = engine.scoped_session("pool");
        pool.classify(&num("pool:type=p", &["A"], 2.0));
        let stats = pool.finish_and_evict();
        assert_eq!(stats.hits, 1);
        assert_eq!(engine.cache().scope_len("default"), 1);
    }

    #[test]
    fn test_excluded_outcome_is_cached() {
        let engine = RuleEngine::new(&[Rule::new("d.*", "")]).unwrap();
        engine.classify(&num("d:type=t", &["A"], 1.0));

        let mut session = engine.session();
        assert!(session.classify(&num("d:type=t", &["A"], 1.0)).is_none());
        let stats = session.finish();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.excluded, 1);
    }
}
