//! rJMX-Bridge library
//!
//! Walks management beans, flattens their attributes into leaves, names each
//! leaf through an ordered rule list and exposes the result in Prometheus
//! format.
//!
//! - [`collector`] - Bean enumeration and flattening (Jolokia or in-process)
//! - [`transformer`] - Rule engine, naming and text exposition
//! - [`scrape`] - Scrape orchestration, timeouts and reload
//! - [`server`] - HTTP endpoints

pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scrape;
pub mod server;
pub mod snapshot;
pub mod transformer;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging subsystem
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Arguments
/// * `level` - Log level string (trace, debug, info, warn, error)
/// * `json` - Emit one JSON object per line instead of text
///
/// # Errors
/// Returns an error if the logging system fails to initialize
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
