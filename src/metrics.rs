//! Scrape-health metrics for rJMX-Bridge
//!
//! Every snapshot carries these families next to the walked samples:
//!
//! - `jmx_scrape_success` - 1 if the endpoint was walked, 0 otherwise
//! - `jmx_scrape_duration_seconds` - Wall time of the scrape
//! - `jmx_scrape_errors_total` - Scrape failures, bean/attribute errors and
//!   series conflicts for the endpoint since start
//! - `jmx_scrape_cached_beans` - Entries in the name-resolution cache
//! - `jmx_scrape_dropped_values` - Leaves dropped for non-numeric values in
//!   this scrape
//! - `jmx_config_reload_success_total` / `jmx_config_reload_failure_total`
//! - `jmx_exporter_build_info{name,version}` - Always 1

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::snapshot::Sample;
use crate::transformer::MetricType;

pub const SCRAPE_SUCCESS: &str = "jmx_scrape_success";
pub const SCRAPE_DURATION: &str = "jmx_scrape_duration_seconds";
pub const SCRAPE_ERRORS: &str = "jmx_scrape_errors_total";
pub const SCRAPE_CACHED_BEANS: &str = "jmx_scrape_cached_beans";
pub const SCRAPE_DROPPED_VALUES: &str = "jmx_scrape_dropped_values";
pub const RELOAD_SUCCESS: &str = "jmx_config_reload_success_total";
pub const RELOAD_FAILURE: &str = "jmx_config_reload_failure_total";
pub const BUILD_INFO: &str = "jmx_exporter_build_info";

/// Thread-safe counter using atomic operations
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter initialized to 0
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe gauge using atomic operations
#[derive(Debug)]
pub struct Gauge {
    /// Stored as bits of f64 for atomic operations
    value: AtomicU64,
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

impl Gauge {
    /// Create a new gauge initialized to 0
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0.0_f64.to_bits()),
        }
    }

    /// Set the gauge to a specific value
    pub fn set(&self, v: f64) {
        self.value.store(v.to_bits(), Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Health figures for one scrape, rendered as samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeHealth {
    pub success: bool,
    pub duration: Duration,
    pub errors_total: u64,
    pub cached_beans: usize,
    pub dropped_values: u64,
    pub reload_success_total: u64,
    pub reload_failure_total: u64,
}

impl ScrapeHealth {
    pub fn to_samples(&self) -> Vec<Sample> {
        vec![
            Sample::new(
                SCRAPE_SUCCESS,
                MetricType::Gauge,
                "Whether the last scrape of the endpoint succeeded",
                if self.success { 1.0 } else { 0.0 },
            ),
            Sample::new(
                SCRAPE_DURATION,
                MetricType::Gauge,
                "Time this scrape took, in seconds",
                self.duration.as_secs_f64(),
            ),
            Sample::new(
                SCRAPE_ERRORS,
                MetricType::Counter,
                "Number of errors while scraping the endpoint",
                self.errors_total as f64,
            ),
            Sample::new(
                SCRAPE_CACHED_BEANS,
                MetricType::Gauge,
                "Number of leaves with a cached name resolution",
                self.cached_beans as f64,
            ),
            Sample::new(
                SCRAPE_DROPPED_VALUES,
                MetricType::Gauge,
                "Number of leaves dropped because their value is not numeric",
                self.dropped_values as f64,
            ),
            Sample::new(
                RELOAD_SUCCESS,
                MetricType::Counter,
                "Number of times configuration have successfully been reloaded",
                self.reload_success_total as f64,
            ),
            Sample::new(
                RELOAD_FAILURE,
                MetricType::Counter,
                "Number of times configuration have failed to be reloaded",
                self.reload_failure_total as f64,
            ),
            build_info(),
        ]
    }
}

/// `jmx_exporter_build_info{name,version} 1`
pub fn build_info() -> Sample {
    Sample::new(
        BUILD_INFO,
        MetricType::Gauge,
        "A metric with a constant '1' value labeled with the exporter name and version",
        1.0,
    )
    .with_label("name", env!("CARGO_PKG_NAME"))
    .with_label("version", env!("CARGO_PKG_VERSION"))
}
