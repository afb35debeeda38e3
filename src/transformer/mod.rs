//! Leaf classification and exposition
//!
//! - `rules`: rule records, compilation and template substitution
//! - `naming`: sanitization, the canonical matcher string, default naming
//! - `engine`: first-match classification of leaves into samples
//! - `cache`: name-resolution cache shared by concurrent scrapes, scoped per endpoint
//! - `formatter`: text exposition output

mod cache;
pub mod engine;
pub mod formatter;
pub mod naming;
pub mod rules;

pub use cache::{RuleCache, UNSCOPED};
pub use engine::{ClassifySession, ClassifyStats, Outcome, ResolvedMetric, RuleEngine};
pub use formatter::{PrometheusFormatter, TEXT_CONTENT_TYPE};
pub use naming::{canonical_string, safe_name, to_snake_and_lower_case};
pub use rules::{
    compile_rules, convert_java_regex, substitute, CompiledRule, MetricType, Rule, RuleBuilder,
    RuleError, RuleResult,
};
