//! Configuration management for rJMX-Bridge
//!
//! The YAML document is loaded into a `serde_yaml::Value`, every string
//! outside `rules` is passed through the [`VariableResolver`], and the result
//! is read through a [`PathAccessor`]. `rules` is deserialized with serde and
//! validated before the configuration is accepted.
//!
//! # Example
//!
//! ```yaml
//! hostPort: localhost:8778
//! username: monitor
//! password: ${file:/run/secrets/jolokia}
//! lowercaseOutputName: true
//! includeObjectNames: ["java.lang:*"]
//! rules:
//!   - pattern: 'java.lang<>type=Memory><>HeapMemoryUsage_(\w+)'
//!     name: jvm_memory_heap_$1_bytes
//!     type: GAUGE
//! httpServer:
//!   port: 9090
//! ```

pub mod accessor;
pub mod variables;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use url::Url;

use crate::collector::{ObjectName, ObjectNamePattern, WalkOptions};
use crate::transformer::{MetricType, Rule, RuleError};

pub use accessor::{PathAccessor, PathError};
pub use variables::{
    EnvironmentVariableProvider, FileVariableProvider, VariableError, VariableProvider,
    VariableResolver,
};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Error parsing the configuration file
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation error
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// A key holds a value of the wrong shape
    #[error("Invalid value at {path}: expected {expected}")]
    InvalidValue { path: String, expected: &'static str },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Default Jolokia request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

/// How to reach a management endpoint
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConnectionConfig {
    /// The in-process bean server
    #[default]
    Local,
    /// A remote Jolokia agent
    Jolokia(JolokiaConfig),
}

impl ConnectionConfig {
    pub fn describe(&self) -> String {
        match self {
            ConnectionConfig::Local => "local".to_string(),
            ConnectionConfig::Jolokia(jolokia) => jolokia.url.clone(),
        }
    }
}

/// Remote Jolokia agent settings
#[derive(Debug, Clone, PartialEq)]
pub struct JolokiaConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
}

/// An extra named endpoint, scraped with `?target=<name>`
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    pub name: String,
    pub connection: ConnectionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HttpServerConfig {
    pub port: u16,
    pub bind_address: String,
    /// Metrics endpoint path
    pub path: String,
    pub threads: ThreadsConfig,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            bind_address: "0.0.0.0".to_string(),
            path: "/metrics".to_string(),
            threads: ThreadsConfig::default(),
        }
    }
}

/// Worker runtime sizing
///
/// `maximum` also bounds the number of scrapes served at once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreadsConfig {
    pub minimum: usize,
    pub maximum: usize,
    pub keep_alive: Duration,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            minimum: 1,
            maximum: 10,
            keep_alive: Duration::from_secs(120),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub start_delay: Duration,
    pub connection: ConnectionConfig,
    pub targets: Vec<TargetConfig>,
    /// Bound on lock wait plus walk plus classify
    pub scrape_timeout: Duration,
    pub lowercase_output_name: bool,
    pub lowercase_output_label_names: bool,
    pub attr_name_snake_case: bool,
    pub default_type: MetricType,
    pub max_walk_depth: usize,
    pub include_object_names: Vec<String>,
    pub exclude_object_names: Vec<String>,
    pub exclude_object_name_attributes: BTreeMap<String, Vec<String>>,
    pub auto_exclude_object_name_attributes: bool,
    pub rules: Vec<Rule>,
    pub http_server: HttpServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start_delay: Duration::ZERO,
            connection: ConnectionConfig::Local,
            targets: Vec::new(),
            scrape_timeout: Duration::from_secs(10),
            lowercase_output_name: false,
            lowercase_output_label_names: false,
            attr_name_snake_case: false,
            default_type: MetricType::Untyped,
            max_walk_depth: 4,
            include_object_names: Vec::new(),
            exclude_object_names: Vec::new(),
            exclude_object_name_attributes: BTreeMap::new(),
            auto_exclude_object_name_attributes: true,
            rules: Vec::new(),
            http_server: HttpServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated
    ///
    /// # Note
    /// - If the file doesn't exist, returns `ConfigError::Read`
    /// - Use `Config::load_or_default()` if you want fallback to defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Load configuration from a YAML file, falling back to defaults if not found
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load(path)
    }

    /// Parse a YAML document with the default variable providers
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_str_with(yaml, &VariableResolver::default())
    }

    pub fn from_yaml_str_with(yaml: &str, resolver: &VariableResolver) -> Result<Self, ConfigError> {
        let document: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(document, resolver)
    }

    /// Build a configuration from a loaded document
    pub fn from_value(document: Value, resolver: &VariableResolver) -> Result<Self, ConfigError> {
        let document = resolve_document(document, resolver)?;
        let accessor = PathAccessor::from_value(document)?;
        let defaults = Config::default();

        let include = string_list(&accessor, "/includeObjectNames")?
            .or(string_list(&accessor, "/whitelistObjectNames")?)
            .unwrap_or_default();
        let exclude = string_list(&accessor, "/excludeObjectNames")?
            .or(string_list(&accessor, "/blacklistObjectNames")?)
            .unwrap_or_default();

        let rules: Vec<Rule> = match accessor.get("/rules")? {
            Some(Value::Null) | None => Vec::new(),
            Some(value) => serde_yaml::from_value(value.clone())?,
        };

        let default_type = match string(&accessor, "/defaultType")? {
            Some(s) => MetricType::parse(&s).ok_or(ConfigError::InvalidValue {
                path: "/defaultType".to_string(),
                expected: "one of GAUGE, COUNTER, UNTYPED",
            })?,
            None => defaults.default_type,
        };

        let threads = ThreadsConfig {
            minimum: integer(&accessor, "/httpServer/threads/minimum")?
                .map_or(defaults.http_server.threads.minimum, |v| v as usize),
            maximum: integer(&accessor, "/httpServer/threads/maximum")?
                .map_or(defaults.http_server.threads.maximum, |v| v as usize),
            keep_alive: integer(&accessor, "/httpServer/threads/keepAliveTime")?
                .map_or(defaults.http_server.threads.keep_alive, Duration::from_secs),
        };

        let port = match integer(&accessor, "/httpServer/port")? {
            Some(p) => u16::try_from(p).map_err(|_| ConfigError::InvalidValue {
                path: "/httpServer/port".to_string(),
                expected: "a port number",
            })?,
            None => defaults.http_server.port,
        };

        let config = Config {
            start_delay: integer(&accessor, "/startDelaySeconds")?
                .map_or(defaults.start_delay, Duration::from_secs),
            connection: connection(&accessor)?,
            targets: targets(&accessor)?,
            scrape_timeout: match float(&accessor, "/scrapeTimeoutSeconds")? {
                Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
                Some(_) => {
                    return Err(ConfigError::Validation(
                        "scrapeTimeoutSeconds must be greater than 0".to_string(),
                    ))
                }
                None => defaults.scrape_timeout,
            },
            lowercase_output_name: boolean(&accessor, "/lowercaseOutputName")?.unwrap_or(false),
            lowercase_output_label_names: boolean(&accessor, "/lowercaseOutputLabelNames")?
                .unwrap_or(false),
            attr_name_snake_case: boolean(&accessor, "/attrNameSnakeCase")?.unwrap_or(false),
            default_type,
            max_walk_depth: integer(&accessor, "/maxWalkDepth")?
                .map_or(defaults.max_walk_depth, |v| v as usize),
            include_object_names: include,
            exclude_object_names: exclude,
            exclude_object_name_attributes: attribute_exclusions(&accessor)?,
            auto_exclude_object_name_attributes: boolean(
                &accessor,
                "/autoExcludeObjectNameAttributes",
            )?
            .unwrap_or(true),
            rules,
            http_server: HttpServerConfig {
                port,
                bind_address: string(&accessor, "/httpServer/bindAddress")?
                    .unwrap_or(defaults.http_server.bind_address),
                path: string(&accessor, "/httpServer/path")?.unwrap_or(defaults.http_server.path),
                threads,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if !self.http_server.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with '/'".to_string(),
            ));
        }

        if matches!(self.http_server.path.as_str(), "/" | "/health" | "/-/reload") {
            return Err(ConfigError::Validation(format!(
                "Metrics path '{}' conflicts with a built-in route",
                self.http_server.path
            )));
        }

        let threads = &self.http_server.threads;
        if threads.maximum == 0 || threads.minimum > threads.maximum {
            return Err(ConfigError::Validation(format!(
                "httpServer.threads: minimum ({}) must not exceed maximum ({}), and maximum must be at least 1",
                threads.minimum, threads.maximum
            )));
        }

        if self.scrape_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "scrapeTimeoutSeconds must be greater than 0".to_string(),
            ));
        }

        if self.max_walk_depth == 0 {
            return Err(ConfigError::Validation(
                "maxWalkDepth must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Target name must not be empty".to_string(),
                ));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate target name '{}'",
                    target.name
                )));
            }
        }

        for (index, rule) in self.rules.iter().enumerate() {
            rule.validate(index)?;
        }

        self.walk_options().map(|_| ())
    }

    /// Object-name filters and walk limits for the bean walk
    pub fn walk_options(&self) -> Result<WalkOptions, ConfigError> {
        let pattern = |s: &String| {
            ObjectNamePattern::parse(s).map_err(|e| {
                ConfigError::Validation(format!("Invalid object name pattern '{}': {}", s, e))
            })
        };

        let mut exclude_attributes: HashMap<String, HashSet<String>> = HashMap::new();
        for (name, attributes) in &self.exclude_object_name_attributes {
            let name = ObjectName::parse(name).map_err(|e| {
                ConfigError::Validation(format!("Invalid object name '{}': {}", name, e))
            })?;
            exclude_attributes
                .entry(name.canonical())
                .or_default()
                .extend(attributes.iter().cloned());
        }

        Ok(WalkOptions {
            include: self
                .include_object_names
                .iter()
                .map(pattern)
                .collect::<Result<_, _>>()?,
            exclude: self
                .exclude_object_names
                .iter()
                .map(pattern)
                .collect::<Result<_, _>>()?,
            exclude_attributes,
            auto_exclude: self.auto_exclude_object_name_attributes,
            max_depth: self.max_walk_depth,
        })
    }
}

/// Resolve variable references in every string outside `rules`
///
/// `password` values are resolved strictly.
fn resolve_document(document: Value, resolver: &VariableResolver) -> Result<Value, ConfigError> {
    match document {
        Value::Mapping(map) => {
            let mut resolved = Mapping::with_capacity(map.len());
            for (key, value) in map {
                let value = match key.as_str() {
                    Some("rules") => value,
                    _ => resolve_value(value, key.as_str() == Some("password"), resolver)?,
                };
                resolved.insert(key, value);
            }
            Ok(Value::Mapping(resolved))
        }
        other => Ok(other),
    }
}

fn resolve_value(value: Value, strict: bool, resolver: &VariableResolver) -> Result<Value, ConfigError> {
    Ok(match value {
        Value::String(s) if strict => Value::String(resolver.resolve_strict(&s)?),
        Value::String(s) => Value::String(resolver.resolve(&s)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| resolve_value(item, false, resolver))
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut resolved = Mapping::with_capacity(map.len());
            for (key, value) in map {
                let strict = key.as_str() == Some("password");
                resolved.insert(key, resolve_value(value, strict, resolver)?);
            }
            Value::Mapping(resolved)
        }
        other => other,
    })
}

fn invalid(path: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        path: path.to_string(),
        expected,
    }
}

/// Strings read from YAML keep their scalar type; accept numbers and booleans
/// that were written without quotes or produced by variable resolution.
fn string(accessor: &PathAccessor, path: &str) -> Result<Option<String>, ConfigError> {
    match accessor.get(path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(invalid(path, "a string")),
    }
}

fn boolean(accessor: &PathAccessor, path: &str) -> Result<Option<bool>, ConfigError> {
    match accessor.get(path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<bool>()
            .map(Some)
            .map_err(|_| invalid(path, "a boolean")),
        Some(_) => Err(invalid(path, "a boolean")),
    }
}

fn integer(accessor: &PathAccessor, path: &str) -> Result<Option<u64>, ConfigError> {
    match accessor.get(path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(path, "a non-negative integer")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| invalid(path, "a non-negative integer")),
        Some(_) => Err(invalid(path, "a non-negative integer")),
    }
}

fn float(accessor: &PathAccessor, path: &str) -> Result<Option<f64>, ConfigError> {
    match accessor.get(path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| invalid(path, "a number")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(path, "a number")),
        Some(_) => Err(invalid(path, "a number")),
    }
}

fn string_list(accessor: &PathAccessor, path: &str) -> Result<Option<Vec<String>>, ConfigError> {
    match accessor.get(path)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(invalid(path, "a list of strings")),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid(path, "a list of strings")),
    }
}

fn attribute_exclusions(
    accessor: &PathAccessor,
) -> Result<BTreeMap<String, Vec<String>>, ConfigError> {
    const PATH: &str = "/excludeObjectNameAttributes";
    let map = match accessor.get(PATH)? {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Mapping(map)) => map,
        Some(_) => return Err(invalid(PATH, "a mapping of object name to attribute list")),
    };

    let mut exclusions = BTreeMap::new();
    for (name, attributes) in map {
        let name = name
            .as_str()
            .ok_or_else(|| invalid(PATH, "object names as keys"))?;
        let attributes = match attributes {
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(PATH, "attribute names as strings"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(invalid(PATH, "a list of attribute names")),
        };
        exclusions.insert(name.to_string(), attributes);
    }
    Ok(exclusions)
}

/// Connection keys at the root of `accessor`
fn connection(accessor: &PathAccessor) -> Result<ConnectionConfig, ConfigError> {
    let host_port = string(accessor, "/hostPort")?.filter(|s| !s.trim().is_empty());
    let jolokia_url = string(accessor, "/jolokiaUrl")?.filter(|s| !s.trim().is_empty());

    let url = match (host_port, jolokia_url) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Validation(
                "At most one of hostPort and jolokiaUrl must be provided".to_string(),
            ))
        }
        (Some(host_port), None) => {
            let ssl = boolean(accessor, "/ssl")?.unwrap_or(false);
            let scheme = if ssl { "https" } else { "http" };
            format!("{}://{}/jolokia", scheme, host_port.trim())
        }
        (None, Some(url)) => url.trim().to_string(),
        (None, None) => return Ok(ConnectionConfig::Local),
    };

    Url::parse(&url).map_err(|e| {
        ConfigError::Validation(format!("Invalid Jolokia URL '{}': {}", url, e))
    })?;

    let username = string(accessor, "/username")?.filter(|s| !s.is_empty());
    let password = string(accessor, "/password")?;
    if username.is_none() && password.is_some() {
        return Err(ConfigError::Validation(
            "password is set but username is missing".to_string(),
        ));
    }

    Ok(ConnectionConfig::Jolokia(JolokiaConfig {
        url,
        username,
        password,
        timeout_ms: integer(accessor, "/requestTimeoutMillis")?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
    }))
}

fn targets(accessor: &PathAccessor) -> Result<Vec<TargetConfig>, ConfigError> {
    let items = match accessor.get("/targets")? {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Sequence(items)) => items.clone(),
        Some(_) => return Err(invalid("/targets", "a list of targets")),
    };

    // Each entry is read through its own accessor rooted at the entry.
    let mut targets = Vec::with_capacity(items.len());
    for (index, entry) in items.into_iter().enumerate() {
        let path = format!("/targets/{}", index);
        let entry = PathAccessor::from_value(entry).map_err(|_| invalid(&path, "a mapping"))?;

        let name = string(&entry, "/name")?.ok_or_else(|| invalid(&path, "a target with a name"))?;
        let ConnectionConfig::Jolokia(mut jolokia) = connection(&entry)? else {
            return Err(ConfigError::Validation(format!(
                "Target '{}' needs hostPort or jolokiaUrl",
                name
            )));
        };
        // A target inherits the top-level request timeout unless it sets its own.
        if let Some(timeout) = integer(&entry, "/requestTimeoutMillis")? {
            jolokia.timeout_ms = timeout;
        } else if let Some(timeout) = integer(accessor, "/requestTimeoutMillis")? {
            jolokia.timeout_ms = timeout;
        }
        targets.push(TargetConfig {
            name,
            connection: ConnectionConfig::Jolokia(jolokia),
        });
    }
    Ok(targets)
}
