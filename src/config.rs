//! Deployment configuration
//!
//! The daemon is configured by a single JSON document: a deployment name,
//! the router worker count, the type bindings that map logical plug-in
//! names to registered factories, and the source/writer instances to build.
//! Unknown top-level keys are ignored so deployments can carry annotations.
//!
//! [`RuntimeSettings`] carries the timing constants of the runtime; the
//! defaults are the production values, and [`RuntimeSettings::fast`] scales
//! them down for tests.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain_types::{DeployName, WorkerCount};
use crate::error::ConfigError;

/// One configured source or writer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Logical type name, resolved through the `Types` bindings.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Instance-specific settings passed verbatim to the plug-in factory.
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// Logical-name → implementation-identifier bindings per plug-in kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeBindings {
    /// Source kinds.
    #[serde(rename = "DataSources", default)]
    pub data_sources: HashMap<String, String>,

    /// Writer kinds.
    #[serde(rename = "DataWriters", default)]
    pub data_writers: HashMap<String, String>,

    /// Transformer kinds.
    #[serde(rename = "Transformers", default)]
    pub transformers: HashMap<String, String>,
}

/// The deployment document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deployment identifier, passed to the route registry.
    #[serde(rename = "DeployName", default)]
    pub deploy_name: Option<String>,

    /// Router worker count; missing or non-positive falls back to 3.
    #[serde(rename = "TargetThreads", default)]
    pub target_threads: Option<i64>,

    /// Plug-in type bindings.
    #[serde(rename = "Types", default)]
    pub types: TypeBindings,

    /// Source instances by name.
    #[serde(rename = "Sources", default)]
    pub sources: HashMap<String, ComponentConfig>,

    /// Writer instances by name.
    #[serde(rename = "Writers", default)]
    pub writers: HashMap<String, ComponentConfig>,

    /// Optional embedded route document for the static registry.
    #[serde(rename = "Routes", default)]
    pub routes: Option<serde_json::Value>,
}

impl EngineConfig {
    /// Loads and validates a deployment document from `path`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates instance entries: every source and writer must name a type.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the offending instance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (section, instances) in [("Sources", &self.sources), ("Writers", &self.writers)] {
            for (name, instance) in instances {
                if instance.kind.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Invalid {
                        field: format!("{section}.{name}"),
                        reason: "missing 'type'".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolved router worker count.
    #[must_use]
    pub fn worker_count(&self) -> WorkerCount {
        WorkerCount::from_config(self.target_threads)
    }

    /// Deployment name, defaulting to `"ingest"`.
    ///
    /// # Panics
    /// Never in practice: the fallback name is always valid.
    #[must_use]
    pub fn deploy_name(&self) -> DeployName {
        self.deploy_name
            .as_deref()
            .and_then(|name| DeployName::try_new(name.to_string()).ok())
            .unwrap_or_else(|| {
                DeployName::try_new("ingest".to_string()).expect("default deploy name is valid")
            })
    }
}

/// Timing and sizing constants of the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Router scavenger count.
    pub target_threads: WorkerCount,
    /// Age at which the route table is considered stale.
    pub refresh_interval: Duration,
    /// Cadence at which the refresher checks staleness.
    pub refresh_tick: Duration,
    /// How long an idle consumer parks before re-checking its queues.
    pub idle_wait: Duration,
    /// Cooperative-stop poll interval.
    pub stop_poll: Duration,
    /// Number of cooperative-stop polls before cancellation.
    pub stop_polls: u32,
    /// Grace period awaited after cancelling a task.
    pub join_grace: Duration,
    /// How long the router waits for its workers to drain on stop.
    pub drain_window: Duration,
    /// Pause between supervisor monitor passes.
    pub monitor_pace: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            target_threads: WorkerCount::default(),
            refresh_interval: Duration::from_secs(3600),
            refresh_tick: Duration::from_secs(10),
            idle_wait: Duration::from_millis(250),
            stop_poll: Duration::from_secs(15),
            stop_polls: 3,
            join_grace: Duration::from_secs(60),
            drain_window: Duration::from_secs(8),
            monitor_pace: Duration::from_millis(100),
        }
    }
}

impl RuntimeSettings {
    /// Millisecond-scale settings for tests: same structure, no multi-second
    /// waits.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            target_threads: WorkerCount::default(),
            refresh_interval: Duration::from_millis(50),
            refresh_tick: Duration::from_millis(10),
            idle_wait: Duration::from_millis(5),
            stop_poll: Duration::from_millis(20),
            stop_polls: 3,
            join_grace: Duration::from_millis(200),
            drain_window: Duration::from_millis(200),
            monitor_pace: Duration::from_millis(50),
        }
    }

    /// Applies the configured worker count.
    #[must_use]
    pub fn with_target_threads(mut self, count: WorkerCount) -> Self {
        self.target_threads = count;
        self
    }

    /// Total cooperative-stop window before cancellation.
    #[must_use]
    pub fn stop_window(&self) -> Duration {
        self.stop_poll * self.stop_polls
    }

    /// Sanity-checks the settings against the host, logging anything
    /// suspicious. Oversubscription is legal, so this never fails.
    pub fn log_validation(&self) {
        let cores = num_cpus::get();
        if self.target_threads.as_usize() > cores * 2 {
            warn!(
                target_threads = self.target_threads.as_usize(),
                cores, "router worker count exceeds 2x CPU cores"
            );
        }
    }
}
