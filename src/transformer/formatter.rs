//! Prometheus Exposition Format output
//!
//! This module renders snapshot samples in the text exposition format
//! (version 0.0.4).
//!
//! # Format Specification
//!
//! ```text
//! # HELP <metric_name> <help_text>
//! # TYPE <metric_name> <type>
//! <metric_name>{<label1>="<value1>",<label2>="<value2>"} <value>
//! ```

use std::collections::HashMap;
use std::fmt::Write;

use crate::snapshot::{Sample, Snapshot};

/// Content type of the text exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus exposition format formatter
///
/// # Example
///
/// ```ignore
/// use rjmx_bridge::transformer::PrometheusFormatter;
///
/// let output = PrometheusFormatter::new().format_snapshot(&snapshot);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusFormatter;

impl PrometheusFormatter {
    /// Create a new formatter
    pub fn new() -> Self {
        Self
    }

    pub fn format_snapshot(&self, snapshot: &Snapshot) -> String {
        self.format(snapshot.samples())
    }

    /// Format samples into Prometheus exposition format
    ///
    /// - HELP and TYPE lines are emitted once per metric name, from the
    ///   first sample with that name
    /// - Samples with the same name are grouped together
    pub fn format(&self, samples: &[Sample]) -> String {
        if samples.is_empty() {
            return String::new();
        }

        let mut output = String::with_capacity(samples.len() * 100);

        for (name, group) in Self::group_by_name(samples) {
            let first = group[0];
            if !first.help.is_empty() {
                let _ = writeln!(output, "# HELP {} {}", name, Self::escape_help(&first.help));
            }
            let _ = writeln!(output, "# TYPE {} {}", name, first.metric_type.as_str());

            for sample in group {
                Self::write_sample_line(&mut output, sample);
            }
        }

        output
    }

    /// Group samples by name, preserving order of first occurrence
    fn group_by_name(samples: &[Sample]) -> Vec<(&str, Vec<&Sample>)> {
        let mut groups: HashMap<&str, Vec<&Sample>> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();

        for sample in samples {
            let name = sample.name.as_str();
            groups
                .entry(name)
                .or_insert_with(|| {
                    order.push(name);
                    Vec::new()
                })
                .push(sample);
        }

        order
            .into_iter()
            .filter_map(|name| groups.remove(name).map(|g| (name, g)))
            .collect()
    }

    fn write_sample_line(output: &mut String, sample: &Sample) {
        output.push_str(&sample.name);

        // BTreeMap iteration is already sorted by label name
        if !sample.labels.is_empty() {
            output.push('{');
            for (index, (k, v)) in sample.labels.iter().enumerate() {
                if index > 0 {
                    output.push(',');
                }
                let _ = write!(output, "{}=\"{}\"", k, Self::escape_label_value(v));
            }
            output.push('}');
        }

        output.push(' ');
        output.push_str(&Self::format_value(sample.value));
        output.push('\n');
    }

    /// Format a numeric value for Prometheus
    ///
    /// - NaN → "NaN"
    /// - +Inf → "+Inf"
    /// - -Inf → "-Inf"
    /// - Integers are formatted without decimal point
    /// - Large/small floats use scientific notation
    pub fn format_value(value: f64) -> String {
        if value.is_nan() {
            "NaN".to_string()
        } else if value.is_infinite() {
            if value.is_sign_positive() {
                "+Inf".to_string()
            } else {
                "-Inf".to_string()
            }
        } else if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else if value.abs() >= 1e6 || (value.abs() < 1e-3 && value != 0.0) {
            format!("{:e}", value)
        } else {
            format!("{}", value)
        }
    }

    /// Escape help text
    ///
    /// Escapes backslash and newline characters.
    fn escape_help(help: &str) -> String {
        help.replace('\\', "\\\\").replace('\n', "\\n")
    }

    /// Escape label value
    ///
    /// Escapes backslash, double-quote, and newline characters.
    fn escape_label_value(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '"' => escaped.push_str("\\\""),
                '\n' => escaped.push_str("\\n"),
                _ => escaped.push(c),
            }
        }
        escaped
    }
}
