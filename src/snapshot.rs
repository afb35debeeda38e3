//! Scrape output model
//!
//! A `Snapshot` holds the samples of one scrape plus its metadata. It is built
//! once through a `SnapshotBuilder`, which enforces that every (name, labels)
//! series appears at most once, and is never mutated after that.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use serde::Serialize;

use crate::transformer::MetricType;

/// One metric observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub help: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn new(name: impl Into<String>, metric_type: MetricType, help: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            metric_type,
            help: help.into(),
            labels: BTreeMap::new(),
            value,
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    fn series(&self) -> (String, BTreeMap<String, String>) {
        (self.name.clone(), self.labels.clone())
    }
}

/// The samples and metadata of one scrape
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    endpoint: String,
    samples: Vec<Sample>,
    #[serde(rename = "duration_seconds", serialize_with = "serialize_secs")]
    duration: Duration,
    success: bool,
    error_count: u64,
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl Snapshot {
    /// Endpoint the samples were walked from
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Errors recorded during this scrape
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// First sample named `name` whose labels include every pair in `labels`
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Option<&Sample> {
        self.samples.iter().find(|s| {
            s.name == name
                && labels
                    .iter()
                    .all(|(k, v)| s.labels.get(*k).map(String::as_str) == Some(*v))
        })
    }

    /// Value of the first sample matching `name` and `labels`
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.find(name, labels).map(|s| s.value)
    }
}

/// Accumulates samples, keeping the first of any duplicated series
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    samples: Vec<Sample>,
    series: HashSet<(String, BTreeMap<String, String>)>,
    conflicts: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `sample` unless its series is already present
    ///
    /// Returns `false` and counts a conflict for a duplicate.
    pub fn push(&mut self, sample: Sample) -> bool {
        if !self.series.insert(sample.series()) {
            self.conflicts += 1;
            return false;
        }
        self.samples.push(sample);
        true
    }

    pub fn contains(&self, name: &str, labels: &BTreeMap<String, String>) -> bool {
        self.series.contains(&(name.to_string(), labels.clone()))
    }

    /// Remove a previously pushed series; returns whether it was present
    pub fn remove(&mut self, name: &str, labels: &BTreeMap<String, String>) -> bool {
        if !self.series.remove(&(name.to_string(), labels.clone())) {
            return false;
        }
        self.samples.retain(|s| !(s.name == name && &s.labels == labels));
        true
    }

    /// Duplicate series rejected so far
    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }

    /// Count a conflict resolved outside `push`
    pub fn record_conflict(&mut self) {
        self.conflicts += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn build(
        self,
        endpoint: impl Into<String>,
        duration: Duration,
        success: bool,
        error_count: u64,
    ) -> Snapshot {
        Snapshot {
            endpoint: endpoint.into(),
            samples: self.samples,
            duration,
            success,
            error_count,
        }
    }
}
