//! Name sanitization, the canonical matcher string and default naming

use crate::collector::BeanLeaf;

/// Replace characters outside `[a-zA-Z0-9:_]` with `_`, collapse runs of `_`
/// and prefix `_` when the result would start with a digit
///
/// `hadoop<service=DataNode, ` becomes `hadoop_service_DataNode_`.
pub fn safe_name(name: &str) -> String {
    sanitize(name, true)
}

/// Like [`safe_name`] but without `:`, which label names may not contain
pub fn safe_label_name(name: &str) -> String {
    sanitize(name, false)
}

fn sanitize(name: &str, allow_colon: bool) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        out.push('_');
    }

    let mut prev_underscore = out.ends_with('_');
    for c in name.chars() {
        let legal = c.is_ascii_alphanumeric() || (allow_colon && c == ':');
        if legal {
            out.push(c);
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }
    out
}

/// camelCase to snake_case, lowercased
///
/// `replaceBlockOpMinTime` becomes `replace_block_op_min_time`; runs of
/// capitals stay together (`HTTPRequests` becomes `httprequests`).
pub fn to_snake_and_lower_case(name: &str) -> String {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    let mut out = String::with_capacity(name.len() + 4);
    out.extend(first.to_lowercase());
    let mut prev_upper_or_underscore = first.is_uppercase() || first == '_';

    for c in chars {
        let upper = c.is_uppercase();
        if upper && !prev_upper_or_underscore {
            out.push('_');
        }
        out.extend(c.to_lowercase());
        prev_upper_or_underscore = upper || c == '_';
    }
    out
}

/// Separator between domain, object keys and attribute path
pub const SEGMENT_SEP: &str = "<>";

/// The string rule patterns are matched against
///
/// `domain<>k1=v1, k2=v2><>Attr_field`, keys in declared order, path
/// segments joined by `_`, then one `\nname=value` line per structural label
/// in name order.
pub fn canonical_string(leaf: &BeanLeaf, snake_case: bool) -> String {
    let mut out = String::with_capacity(96);
    out.push_str(leaf.domain());
    out.push_str(SEGMENT_SEP);
    for (index, (k, v)) in leaf.object_keys().iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out.push('>');
    out.push_str(SEGMENT_SEP);
    push_path(&mut out, &leaf.attribute_path, snake_case);

    let mut labels: Vec<&(String, String)> = leaf.structural_labels.iter().collect();
    labels.sort();
    for (name, value) in labels {
        out.push('\n');
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}

fn push_path(out: &mut String, path: &[String], snake_case: bool) {
    for (index, segment) in path.iter().enumerate() {
        if index > 0 {
            out.push('_');
        }
        if snake_case {
            out.push_str(&to_snake_and_lower_case(segment));
        } else {
            out.push_str(segment);
        }
    }
}

/// Metric name used when no rule names the leaf: domain, first key value,
/// then the attribute path
pub fn default_metric_name(leaf: &BeanLeaf, snake_case: bool) -> String {
    let mut name = String::with_capacity(64);
    name.push_str(leaf.domain());
    if let Some((_, first)) = leaf.object_keys().first() {
        name.push('_');
        name.push_str(first);
    }
    name.push('_');
    push_path(&mut name, &leaf.attribute_path, snake_case);
    safe_name(&name)
}

/// Labels used with default naming: every object key but the first, then the
/// structural labels
pub fn default_labels(leaf: &BeanLeaf) -> impl Iterator<Item = (&str, &str)> {
    leaf.object_keys()
        .iter()
        .skip(1)
        .chain(leaf.structural_labels.iter())
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

/// Help text used when a rule gives none
pub fn default_help(leaf: &BeanLeaf) -> String {
    let canonical = canonical_string(leaf, false);
    let first_line = canonical.lines().next().unwrap_or_default();
    match leaf.description.as_deref() {
        Some(desc) if desc != leaf.attribute() => format!("{} {}", desc, first_line),
        _ => first_line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{LeafValue, ObjectName};
    use std::sync::Arc;

    fn leaf(object_name: &str, path: &[&str], labels: &[(&str, &str)]) -> BeanLeaf {
        BeanLeaf::new(
            Arc::new(ObjectName::parse(object_name).unwrap()),
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
    fn test_safe_name() {
        assert_eq!(safe_name("hadoop<service=DataNode, "), "hadoop_service_DataNode_");
        assert_eq!(safe_name("a__b"), "a_b");
        assert_eq!(safe_name("9lives"), "_9lives");
        assert_eq!(safe_name("ns:metric"), "ns:metric");
        assert_eq!(safe_name(""), "");
        assert_eq!(safe_name("___"), "_");
        assert_eq!(safe_name("-"), "_");
    }

    #[test]
    fn test_safe_label_name_rejects_colon() {
        assert_eq!(safe_label_name("a:b"), "a_b");
        assert_eq!(safe_label_name("0x"), "_0x");
    }

    #[test]
    fn test_to_snake_and_lower_case() {
        assert_eq!(to_snake_and_lower_case("replaceBlockOpMinTime"), "replace_block_op_min_time");
        assert_eq!(to_snake_and_lower_case("HeapMemoryUsage"), "heap_memory_usage");
        assert_eq!(to_snake_and_lower_case("already_snake"), "already_snake");
        assert_eq!(to_snake_and_lower_case("_Private"), "_private");
        assert_eq!(to_snake_and_lower_case("HTTPRequests"), "httprequests");
        assert_eq!(to_snake_and_lower_case(""), "");
    }

    #[test]
    fn test_canonical_string() {
        let l = leaf(
            "io.prometheus.jmx:type=tabularData,name=t",
            &["Table", "size"],
            &[("source", "/dev/sda1")],
        );
        assert_eq!(
            canonical_string(&l, false),
            "io.prometheus.jmx<>type=tabularData, name=t><>Table_size\nsource=/dev/sda1"
        );
    }

    #[test]
    fn test_canonical_string_sorts_structural_labels() {
        let l = leaf("d:type=t", &["A"], &[("z", "1"), ("a", "2")]);
        assert_eq!(canonical_string(&l, false), "d<>type=t><>A\na=2\nz=1");
    }

    #[test]
    fn test_canonical_string_snake_case() {
        let l = leaf("d:type=t", &["HeapMemoryUsage", "used"], &[]);
        assert_eq!(canonical_string(&l, true), "d<>type=t><>heap_memory_usage_used");
    }

    #[test]
    fn test_default_metric_name() {
        let l = leaf(
            "hadoop:service=DataNode,name=DataNodeActivity-ams",
            &["replaceBlockOpMinTime"],
            &[],
        );
        assert_eq!(
            default_metric_name(&l, false),
            "hadoop_DataNode_replaceBlockOpMinTime"
        );
        assert_eq!(
            default_metric_name(&l, true),
            "hadoop_DataNode_replace_block_op_min_time"
        );
        let labels: Vec<_> = default_labels(&l).collect();
        assert_eq!(labels, vec![("name", "DataNodeActivity-ams")]);
    }

    #[test]
    fn test_default_help() {
        let mut l = leaf("d:type=t", &["Count"], &[("row", "1")]);
        assert_eq!(default_help(&l), "d<>type=t><>Count");

        l.description = Some(Arc::from("Number of things"));
        assert_eq!(default_help(&l), "Number of things d<>type=t><>Count");

        l.description = Some(Arc::from("Count"));
        assert_eq!(default_help(&l), "d<>type=t><>Count");
    }
}
