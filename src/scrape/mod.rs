//! Scrape orchestration
//!
//! `ScrapeOrchestrator` runs one walk-classify-expose cycle per request:
//!
//! 1. Reload the configuration if the file changed, then pin the active rule
//!    engine for the whole scrape
//! 2. Take the endpoint's exclusive slot (concurrent scrapes of the same
//!    endpoint queue here, different endpoints run in parallel)
//! 3. Walk the endpoint and classify each leaf as it arrives
//! 4. Append the scrape-health samples
//!
//! Steps 2 and 3 run under the configured scrape timeout. A scrape that times
//! out is dropped where it stands, which cancels any in-flight request and
//! releases the slot, and an empty snapshot with `jmx_scrape_success 0` is
//! returned.
//!
//! Each endpoint moves `Idle → Connecting → Walking → Classifying → Exposing
//! → Idle`, or through `Failed` back to `Idle` when the walk fails or times
//! out. `last_success` in [`EndpointStatus`] keeps the outcome.

pub mod reload;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::collector::{
    AutoExclusions, BeanServer, BeanWalk, JolokiaClient, ManagementConnection, WalkOptions,
    WalkStats,
};
use crate::config::{Config, ConfigError, ConnectionConfig};
use crate::error::{AppResult, CollectorError, ScrapeError};
use crate::metrics::{Counter, Gauge, ScrapeHealth};
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::transformer::{ClassifyStats, RuleEngine};

pub use reload::{ConfigWatcher, ReloadStats};

/// Name of the endpoint scraped when no target is requested
pub const DEFAULT_ENDPOINT: &str = "default";

/// Where an endpoint is in its scrape cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle = 0,
    Connecting = 1,
    Walking = 2,
    Classifying = 3,
    Exposing = 4,
    Failed = 5,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Phase::Connecting,
            2 => Phase::Walking,
            3 => Phase::Classifying,
            4 => Phase::Exposing,
            5 => Phase::Failed,
            _ => Phase::Idle,
        }
    }
}

/// Per-endpoint state that outlives a single scrape
struct Endpoint {
    name: String,
    connection: Arc<dyn ManagementConnection>,
    slot: Mutex<()>,
    errors_total: Counter,
    exclusions: Arc<AutoExclusions>,
    phase: AtomicU8,
    last_outcome: AtomicU8,
    last_duration: Gauge,
}

impl Endpoint {
    fn new(name: impl Into<String>, connection: Arc<dyn ManagementConnection>) -> Self {
        Self {
            name: name.into(),
            connection,
            slot: Mutex::new(()),
            errors_total: Counter::new(),
            exclusions: Arc::new(AutoExclusions::default()),
            phase: AtomicU8::new(Phase::Idle as u8),
            last_outcome: AtomicU8::new(OUTCOME_NONE),
            last_duration: Gauge::new(),
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    /// Move to `to` only if no other scrape has taken over the phase since
    fn transition(&self, from: Phase, to: Phase) {
        let _ = self.phase.compare_exchange(
            from as u8,
            to as u8,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    fn record_outcome(&self, success: bool) {
        let outcome = if success { OUTCOME_SUCCESS } else { OUTCOME_FAILURE };
        self.last_outcome.store(outcome, Ordering::Relaxed);
    }

    fn last_success(&self) -> Option<bool> {
        match self.last_outcome.load(Ordering::Relaxed) {
            OUTCOME_SUCCESS => Some(true),
            OUTCOME_FAILURE => Some(false),
            _ => None,
        }
    }
}

const OUTCOME_NONE: u8 = 0;
const OUTCOME_SUCCESS: u8 = 1;
const OUTCOME_FAILURE: u8 = 2;

/// Point-in-time view of one endpoint, for `/health`
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub name: String,
    pub endpoint: String,
    pub phase: Phase,
    /// Whether the last completed scrape succeeded; `None` before the first
    pub last_success: Option<bool>,
    pub errors_total: u64,
    pub last_duration_seconds: f64,
}

/// Everything a reload replaces
struct ActiveConfig {
    engine: Arc<RuleEngine>,
    walk: Arc<WalkOptions>,
    scrape_timeout: Duration,
    start_delay: Duration,
}

impl ActiveConfig {
    fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: Arc::new(RuleEngine::from_config(config)?),
            walk: Arc::new(config.walk_options()?),
            scrape_timeout: config.scrape_timeout,
            start_delay: config.start_delay,
        })
    }
}

fn connect(connection: &ConnectionConfig, local: &Arc<BeanServer>) -> AppResult<Arc<dyn ManagementConnection>> {
    match connection {
        ConnectionConfig::Local => Ok(local.clone() as Arc<dyn ManagementConnection>),
        ConnectionConfig::Jolokia(jolokia) => {
            let mut client = JolokiaClient::new(&jolokia.url, jolokia.timeout_ms)?;
            if let Some(username) = &jolokia.username {
                client = client.with_auth(username, jolokia.password.as_deref().unwrap_or_default());
            }
            Ok(Arc::new(client))
        }
    }
}

/// Builder for [`ScrapeOrchestrator`]
pub struct ScrapeOrchestratorBuilder {
    config: Config,
    bean_server: Option<Arc<BeanServer>>,
    config_path: Option<PathBuf>,
    connection: Option<Arc<dyn ManagementConnection>>,
    target_connections: HashMap<String, Arc<dyn ManagementConnection>>,
}

impl ScrapeOrchestratorBuilder {
    /// Registry used when the configuration names no remote agent
    pub fn bean_server(mut self, server: Arc<BeanServer>) -> Self {
        self.bean_server = Some(server);
        self
    }

    /// File to watch for changes and to re-read on `reload_from_file`
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Use `connection` for the default endpoint instead of the configured one
    pub fn connection(mut self, connection: Arc<dyn ManagementConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Use `connection` for the configured target `name`
    pub fn target_connection(
        mut self,
        name: impl Into<String>,
        connection: Arc<dyn ManagementConnection>,
    ) -> Self {
        self.target_connections.insert(name.into(), connection);
        self
    }

    pub fn build(mut self) -> AppResult<ScrapeOrchestrator> {
        let active = ActiveConfig::from_config(&self.config)?;
        let local = self.bean_server.unwrap_or_default();

        let default_connection = match self.connection {
            Some(connection) => connection,
            None => connect(&self.config.connection, &local)?,
        };

        let mut targets = HashMap::with_capacity(self.config.targets.len());
        for target in &self.config.targets {
            let connection = match self.target_connections.remove(&target.name) {
                Some(connection) => connection,
                None => connect(&target.connection, &local)?,
            };
            targets.insert(
                target.name.clone(),
                Arc::new(Endpoint::new(target.name.clone(), connection)),
            );
        }

        info!(
            endpoint = %default_connection.endpoint(),
            targets = targets.len(),
            rules = active.engine.rule_count(),
            "Scrape orchestrator ready"
        );

        Ok(ScrapeOrchestrator {
            active: ArcSwap::from_pointee(active),
            default: Arc::new(Endpoint::new(DEFAULT_ENDPOINT, default_connection)),
            targets,
            watcher: self.config_path.map(ConfigWatcher::new),
            reloads: ReloadStats::default(),
            started: Instant::now(),
        })
    }
}

/// Drives scrapes of the configured endpoints
pub struct ScrapeOrchestrator {
    active: ArcSwap<ActiveConfig>,
    default: Arc<Endpoint>,
    targets: HashMap<String, Arc<Endpoint>>,
    watcher: Option<ConfigWatcher>,
    reloads: ReloadStats,
    started: Instant,
}

impl std::fmt::Debug for ScrapeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeOrchestrator")
            .field("endpoint", &self.default.connection.endpoint())
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What one completed walk produced
struct WalkOutcome {
    walk: WalkStats,
    classify: ClassifyStats,
}

impl ScrapeOrchestrator {
    pub fn builder(config: Config) -> ScrapeOrchestratorBuilder {
        ScrapeOrchestratorBuilder {
            config,
            bean_server: None,
            config_path: None,
            connection: None,
            target_connections: HashMap::new(),
        }
    }

    /// Scrape the default endpoint
    pub async fn collect(&self) -> Snapshot {
        let endpoint = Arc::clone(&self.default);
        self.scrape_endpoint(&endpoint).await
    }

    /// Scrape the default endpoint or the named target
    ///
    /// Only an unknown target is an error; endpoint failures are reported
    /// through the health samples of the returned snapshot.
    pub async fn scrape(&self, target: Option<&str>) -> Result<Snapshot, ScrapeError> {
        let endpoint = match target {
            None => Arc::clone(&self.default),
            Some(name) => self
                .targets
                .get(name)
                .cloned()
                .ok_or_else(|| ScrapeError::UnknownTarget(name.to_string()))?,
        };
        Ok(self.scrape_endpoint(&endpoint).await)
    }

    /// Names of the extra targets
    pub fn target_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Status of every endpoint, default first
    pub fn endpoint_status(&self) -> Vec<EndpointStatus> {
        let mut targets: Vec<&Arc<Endpoint>> = self.targets.values().collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));

        std::iter::once(&self.default)
            .chain(targets)
            .map(|e| EndpointStatus {
                name: e.name.clone(),
                endpoint: e.connection.endpoint().to_string(),
                phase: e.phase(),
                last_success: e.last_success(),
                errors_total: e.errors_total.get(),
                last_duration_seconds: e.last_duration.get(),
            })
            .collect()
    }

    pub fn reload_stats(&self) -> &ReloadStats {
        &self.reloads
    }

    /// Rule engine the next scrape will use
    pub fn engine(&self) -> Arc<RuleEngine> {
        Arc::clone(&self.active.load().engine)
    }

    /// Replace the active rules and walk settings
    ///
    /// Scrapes already running finish with the previous rules; the next scrape
    /// starts with an empty name-resolution cache. Connection settings are
    /// fixed at startup and are not affected.
    pub fn reload(&self, config: &Config) -> Result<(), ConfigError> {
        match ActiveConfig::from_config(config) {
            Ok(active) => {
                let rules = active.engine.rule_count();
                self.active.store(Arc::new(active));
                self.reloads.success.inc();
                info!(rules, "Configuration reloaded");
                Ok(())
            }
            Err(e) => {
                self.reloads.failure.inc();
                error!(error = %e, "Configuration reload failed");
                Err(e)
            }
        }
    }

    /// Re-read the configuration file and reload it
    pub fn reload_from_file(&self) -> Result<(), ConfigError> {
        let Some(watcher) = &self.watcher else {
            return Err(ConfigError::Validation(
                "No configuration file to reload from".to_string(),
            ));
        };

        let mtime = watcher.current();
        let config = match Config::load(watcher.path()) {
            Ok(config) => config,
            Err(e) => {
                self.reloads.failure.inc();
                error!(path = %watcher.path().display(), error = %e, "Configuration reload failed");
                return Err(e);
            }
        };

        self.reload(&config)?;
        if let Some(mtime) = mtime {
            watcher.mark_loaded(mtime);
        }
        Ok(())
    }

    fn reload_if_changed(&self) {
        if let Some(watcher) = &self.watcher {
            if watcher.changed().is_some() {
                debug!(path = %watcher.path().display(), "Configuration file changed, reloading");
                // Failures are logged and counted by reload_from_file.
                let _ = self.reload_from_file();
            }
        }
    }

    #[instrument(skip(self, endpoint), fields(endpoint = %endpoint.name))]
    async fn scrape_endpoint(&self, endpoint: &Endpoint) -> Snapshot {
        self.reload_if_changed();
        let active = self.active.load_full();
        let start = Instant::now();

        if self.started.elapsed() < active.start_delay {
            debug!("Start delay has not elapsed, skipping walk");
            let mut builder = SnapshotBuilder::new();
            self.push_health(&mut builder, endpoint, &active, false, start.elapsed(), 0);
            return builder.build(endpoint.connection.endpoint(), start.elapsed(), false, 0);
        }

        let mut builder = SnapshotBuilder::new();
        let acquired = AtomicBool::new(false);
        let deadline = tokio::time::Instant::now() + active.scrape_timeout;
        let result = tokio::time::timeout_at(
            deadline,
            self.walk_and_classify(endpoint, &active, &mut builder, &acquired),
        )
        .await;

        let (success, mut errors, dropped) = match result {
            Ok(Ok(outcome)) => (
                true,
                outcome.walk.errors(),
                outcome.classify.dropped_values + outcome.walk.dropped(),
            ),
            Ok(Err(e)) => {
                let e = ScrapeError::Walk {
                    endpoint: endpoint.connection.endpoint().to_string(),
                    source: e,
                };
                warn!(error = %e, "Scrape failed");
                builder = SnapshotBuilder::new();
                (false, 1, 0)
            }
            Err(_) => {
                let e = ScrapeError::Timeout {
                    endpoint: endpoint.connection.endpoint().to_string(),
                    timeout_ms: active.scrape_timeout.as_millis() as u64,
                };
                warn!(error = %e, "Scrape timed out");
                // A scrape still queued for the slot must not overwrite the holder's phase.
                if acquired.load(Ordering::Relaxed) {
                    endpoint.set_phase(Phase::Failed);
                }
                builder = SnapshotBuilder::new();
                (false, 1, 0)
            }
        };
        let held_slot = acquired.load(Ordering::Relaxed);

        self.remove_shadowed_health(&mut builder, endpoint, &active, dropped);
        errors += builder.conflicts();
        endpoint.errors_total.inc_by(errors);

        let duration = start.elapsed();
        endpoint.last_duration.set(duration.as_secs_f64());
        self.push_health(&mut builder, endpoint, &active, success, duration, dropped);

        endpoint.record_outcome(success);
        if success {
            endpoint.transition(Phase::Exposing, Phase::Idle);
        } else if held_slot {
            endpoint.transition(Phase::Failed, Phase::Idle);
        }
        debug!(
            samples = builder.len(),
            errors,
            duration_ms = duration.as_millis() as u64,
            "Scrape complete"
        );
        builder.build(endpoint.connection.endpoint(), duration, success, errors)
    }

    /// Lock wait, walk and classification; the part bounded by the timeout
    async fn walk_and_classify(
        &self,
        endpoint: &Endpoint,
        active: &ActiveConfig,
        builder: &mut SnapshotBuilder,
        acquired: &AtomicBool,
    ) -> Result<WalkOutcome, CollectorError> {
        let _slot = endpoint.slot.lock().await;
        acquired.store(true, Ordering::Relaxed);
        endpoint.set_phase(Phase::Connecting);

        let mut walk = BeanWalk::new(
            Arc::clone(&endpoint.connection),
            Arc::clone(&active.walk),
            Arc::clone(&endpoint.exclusions),
        );
        let mut session = active.engine.scoped_session(&endpoint.name);

        loop {
            endpoint.set_phase(Phase::Walking);
            let leaf = match walk.next().await {
                Ok(Some(leaf)) => leaf,
                Ok(None) => break,
                Err(e) => {
                    session.finish();
                    endpoint.set_phase(Phase::Failed);
                    return Err(e);
                }
            };

            endpoint.set_phase(Phase::Classifying);
            if let Some(sample) = session.classify(&leaf) {
                if !builder.push(sample) {
                    debug!(
                        mbean = %leaf.object_name,
                        path = ?leaf.attribute_path,
                        "Duplicate series dropped"
                    );
                }
            }
        }

        // Only a complete walk knows which identities are gone.
        let classify = session.finish_and_evict();
        endpoint.set_phase(Phase::Exposing);
        Ok(WalkOutcome {
            walk: walk.stats(),
            classify,
        })
    }

    /// Drop walked samples that collide with a health series; each is a conflict
    fn remove_shadowed_health(
        &self,
        builder: &mut SnapshotBuilder,
        endpoint: &Endpoint,
        active: &ActiveConfig,
        dropped: u64,
    ) {
        for sample in self.health(endpoint, active, false, Duration::ZERO, dropped).to_samples() {
            if builder.remove(&sample.name, &sample.labels) {
                warn!(metric = %sample.name, "Walked sample collides with a scrape-health metric");
                builder.record_conflict();
            }
        }
    }

    fn health(
        &self,
        endpoint: &Endpoint,
        active: &ActiveConfig,
        success: bool,
        duration: Duration,
        dropped: u64,
    ) -> ScrapeHealth {
        ScrapeHealth {
            success,
            duration,
            errors_total: endpoint.errors_total.get(),
            cached_beans: active.engine.cache().len(),
            dropped_values: dropped,
            reload_success_total: self.reloads.success.get(),
            reload_failure_total: self.reloads.failure.get(),
        }
    }

    fn push_health(
        &self,
        builder: &mut SnapshotBuilder,
        endpoint: &Endpoint,
        active: &ActiveConfig,
        success: bool,
        duration: Duration,
        dropped: u64,
    ) {
        for sample in self.health(endpoint, active, success, duration, dropped).to_samples() {
            builder.push(sample);
        }
    }
}
