//! CLI argument parsing for rJMX-Bridge
//!
//! # Options
//!
//! - `--config` / `-c`: Configuration file path (default: config.yaml, env: RJMX_CONFIG)
//! - `--log-level` / `-l`: Log level (trace/debug/info/warn/error, env: RJMX_LOG_LEVEL)
//! - `--log-format`: Log line format (text/json, env: RJMX_LOG_FORMAT)
//! - `--validate`: Check the configuration and exit
//! - `--dry-run`: Check the configuration and print the rules it compiles
//! - `--output-format`: Report format for validate/dry-run (text/json/yaml)
//!
//! Overrides applied on top of the configuration file:
//!
//! - `--port` / `-p` (env: RJMX_PORT)
//! - `--bind-address` (env: RJMX_BIND_ADDRESS)
//! - `--metrics-path` (env: RJMX_METRICS_PATH)
//! - `--jolokia-url`: Jolokia agent of the default endpoint (env: RJMX_JOLOKIA_URL)
//! - `--scrape-timeout`: Scrape timeout in seconds (env: RJMX_SCRAPE_TIMEOUT)
//!
//! An override wins over its environment variable, which wins over the file.
//! Overrides are not re-applied when the file is reloaded; a reload only
//! replaces rules and walk settings.

use clap::{Args, Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    Config, ConfigError, ConnectionConfig, JolokiaConfig, DEFAULT_REQUEST_TIMEOUT_MS,
};

/// rJMX-Bridge - Management bean attributes as Prometheus metrics
///
/// Walks the beans of a Jolokia agent (or the in-process bean server),
/// names every attribute leaf through an ordered rule list and serves the
/// result in the Prometheus text format.
#[derive(Parser, Debug)]
#[command(name = "rjmx-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config.yaml",
        env = "RJMX_CONFIG"
    )]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: Overrides,

    /// Check the configuration and exit
    #[arg(long, conflicts_with = "dry_run")]
    pub validate: bool,

    /// Check the configuration and print the rules it compiles
    #[arg(long)]
    pub dry_run: bool,

    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        env = "RJMX_LOG_LEVEL"
    )]
    pub log_level: LogLevel,

    #[arg(long, value_enum, default_value = "text", env = "RJMX_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Report format for --validate and --dry-run
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl Cli {
    /// `--validate` or `--dry-run`
    pub fn check_only(&self) -> bool {
        self.validate || self.dry_run
    }
}

/// Settings that replace the corresponding configuration file values
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    /// Server port
    #[arg(short, long, value_name = "PORT", env = "RJMX_PORT")]
    pub port: Option<u16>,

    /// Server bind address: an IP address (0.0.0.0, 127.0.0.1, ::1) or "localhost"
    #[arg(long, value_name = "ADDRESS", env = "RJMX_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Metrics endpoint path
    #[arg(long, value_name = "PATH", env = "RJMX_METRICS_PATH")]
    pub metrics_path: Option<String>,

    /// Jolokia agent URL of the default endpoint
    #[arg(long, value_name = "URL", env = "RJMX_JOLOKIA_URL")]
    pub jolokia_url: Option<String>,

    /// Scrape timeout in seconds
    #[arg(long, value_name = "SECONDS", env = "RJMX_SCRAPE_TIMEOUT")]
    pub scrape_timeout: Option<f64>,
}

impl Overrides {
    /// Apply to `config` and re-validate it
    ///
    /// A Jolokia URL keeps the credentials and request timeout of an existing
    /// Jolokia connection.
    pub fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(port) = self.port {
            config.http_server.port = port;
        }
        if let Some(bind_address) = &self.bind_address {
            config.http_server.bind_address = bind_address.clone();
        }
        if let Some(path) = &self.metrics_path {
            config.http_server.path = path.clone();
        }

        if let Some(url) = &self.jolokia_url {
            url::Url::parse(url).map_err(|e| {
                ConfigError::Validation(format!("Invalid Jolokia URL '{}': {}", url, e))
            })?;
            let jolokia = match &config.connection {
                ConnectionConfig::Jolokia(existing) => JolokiaConfig {
                    url: url.clone(),
                    ..existing.clone()
                },
                ConnectionConfig::Local => JolokiaConfig {
                    url: url.clone(),
                    username: None,
                    password: None,
                    timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
                },
            };
            config.connection = ConnectionConfig::Jolokia(jolokia);
        }

        if let Some(secs) = self.scrape_timeout {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::Validation(
                    "scrape timeout must be greater than 0".to_string(),
                ));
            }
            config.scrape_timeout = Duration::from_secs_f64(secs);
        }

        config.validate()
    }
}

/// Log level options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Most verbose
    Trace,
    Debug,
    /// Default
    Info,
    Warn,
    /// Least verbose
    Error,
}

impl LogLevel {
    /// Directive for `EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    /// One JSON object per line
    Json,
}

/// Report formats for validate and dry-run modes
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable
    Text,
    Json,
    Yaml,
}
