//! Pipeline supervisor
//!
//! The [`IngestEngine`] is the composition root: it resolves the configured
//! sources and writers through an explicit [`TypeRegistry`] of plug-in
//! factories, drives initialization and startup in dependency order
//! (writers → router → sources), and runs a monitor task that restarts any
//! component observed `Failed`. Engines are plain values: tests build as
//! many independent ones as they like.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{ComponentConfig, EngineConfig, RuntimeSettings};
use crate::domain_types::DeployName;
use crate::error::{ConfigError, PluginError};
use crate::lifecycle::{LifecycleCell, RunState};
use crate::registry::MetaRegistry;
use crate::router::IngestRouter;
use crate::source::{SourceBackend, SourceHost};
use crate::transformer::{Transformer, TransformerFactory};
use crate::writer::{WriterBackend, WriterHost};

/// Builds source backends from instance configuration.
pub trait SourceFactory: Send + Sync {
    /// Creates the backend for instance `name`.
    ///
    /// # Errors
    /// Returns [`PluginError`] when the instance settings are unusable.
    fn create(
        &self,
        name: &str,
        settings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<dyn SourceBackend>, PluginError>;
}

/// Builds writer backends from instance configuration.
pub trait WriterFactory: Send + Sync {
    /// Creates the backend for instance `name`.
    ///
    /// # Errors
    /// Returns [`PluginError`] when the instance settings are unusable.
    fn create(
        &self,
        name: &str,
        settings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<dyn WriterBackend>, PluginError>;
}

/// Explicit factory maps, keyed by the implementation identifiers the
/// configuration's `Types` section points at.
#[derive(Default)]
pub struct TypeRegistry {
    sources: HashMap<String, Arc<dyn SourceFactory>>,
    writers: HashMap<String, Arc<dyn WriterFactory>>,
    transformers: HashMap<String, Arc<dyn TransformerFactory>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source factory under `id`.
    pub fn register_source(&mut self, id: impl Into<String>, factory: Arc<dyn SourceFactory>) {
        self.sources.insert(id.into(), factory);
    }

    /// Registers a writer factory under `id`.
    pub fn register_writer(&mut self, id: impl Into<String>, factory: Arc<dyn WriterFactory>) {
        self.writers.insert(id.into(), factory);
    }

    /// Registers a transformer factory under `id`.
    pub fn register_transformer(
        &mut self,
        id: impl Into<String>,
        factory: Arc<dyn TransformerFactory>,
    ) {
        self.transformers.insert(id.into(), factory);
    }

    fn source(&self, id: &str) -> Option<Arc<dyn SourceFactory>> {
        self.sources.get(id).cloned()
    }

    fn writer(&self, id: &str) -> Option<Arc<dyn WriterFactory>> {
        self.writers.get(id).cloned()
    }

    fn transformer(&self, id: &str) -> Option<Arc<dyn TransformerFactory>> {
        self.transformers.get(id).cloned()
    }
}

/// Read-only view of the initialized components, consulted by the router
/// when reconciling route descriptors.
pub struct ComponentDirectory {
    sources: HashSet<String>,
    writers: HashMap<String, Arc<WriterHost>>,
    transformers: HashMap<String, Arc<dyn TransformerFactory>>,
}

impl ComponentDirectory {
    /// Builds a directory from the initialized component sets. Transformer
    /// keys are the lowercased logical names route descriptors use.
    #[must_use]
    pub fn new(
        sources: HashSet<String>,
        writers: HashMap<String, Arc<WriterHost>>,
        transformers: HashMap<String, Arc<dyn TransformerFactory>>,
    ) -> Self {
        Self {
            sources,
            writers,
            transformers,
        }
    }

    /// True when a source of that name was initialized.
    #[must_use]
    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains(name)
    }

    /// The writer host registered under `name`.
    #[must_use]
    pub fn writer(&self, name: &str) -> Option<Arc<WriterHost>> {
        self.writers.get(name).cloned()
    }

    /// Builds an initialized transformer from its lowercased logical name
    /// and `info` argument.
    ///
    /// # Errors
    /// Returns [`PluginError::Init`] for unknown names or rejected `info`.
    pub fn make_transformer(
        &self,
        name: &str,
        info: &str,
    ) -> Result<Arc<dyn Transformer>, PluginError> {
        let factory = self.transformers.get(name).ok_or_else(|| PluginError::Init {
            name: name.to_string(),
            reason: "unknown transformer type".to_string(),
        })?;
        factory.create(info)
    }
}

/// Supervisor owning every pipeline component.
pub struct IngestEngine {
    deploy_name: DeployName,
    cell: Arc<LifecycleCell>,
    config: EngineConfig,
    types: TypeRegistry,
    settings: RuntimeSettings,
    router: Arc<IngestRouter>,
    sources: DashMap<String, Arc<SourceHost>>,
    writers: DashMap<String, Arc<WriterHost>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl IngestEngine {
    /// Builds an engine from its configuration, factory registry, and route
    /// registry. Nothing is initialized yet.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        types: TypeRegistry,
        registry: Arc<dyn MetaRegistry>,
        settings: RuntimeSettings,
    ) -> Arc<Self> {
        let settings = settings.with_target_threads(config.worker_count());
        settings.log_validation();
        let router = Arc::new(IngestRouter::new(registry, settings.clone()));
        Arc::new(Self {
            deploy_name: config.deploy_name(),
            cell: Arc::new(LifecycleCell::new()),
            config,
            types,
            settings,
            router,
            sources: DashMap::new(),
            writers: DashMap::new(),
            monitor: Mutex::new(None),
        })
    }

    /// Deployment identifier.
    #[must_use]
    pub fn deploy_name(&self) -> &DeployName {
        &self.deploy_name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.cell.get()
    }

    /// The router dataplane.
    #[must_use]
    pub fn router(&self) -> Arc<IngestRouter> {
        Arc::clone(&self.router)
    }

    /// The writer host registered under `name`, if initialized.
    #[must_use]
    pub fn writer(&self, name: &str) -> Option<Arc<WriterHost>> {
        self.writers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// The source host registered under `name`, if initialized.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<Arc<SourceHost>> {
        self.sources.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every component's lifecycle state, router included.
    #[must_use]
    pub fn component_states(&self) -> Vec<(String, RunState)> {
        let mut states = vec![("router".to_string(), self.router.state())];
        for entry in &self.sources {
            states.push((entry.key().clone(), entry.value().state()));
        }
        for entry in &self.writers {
            states.push((entry.key().clone(), entry.value().state()));
        }
        states
    }

    fn source_snapshot(&self) -> Vec<(String, Arc<SourceHost>)> {
        self.sources
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn writer_snapshot(&self) -> Vec<(String, Arc<WriterHost>)> {
        self.writers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Initializes every configured component in order: sources, writers,
    /// then the router. Every configured component is required; any failure
    /// leaves the engine in `FailedInitialization` (re-initialization is
    /// permitted and already-initialized components answer idempotently).
    pub async fn initialize(&self) -> bool {
        let Some(_) = self.cell.begin(RunState::can_initialize) else {
            return self.cell.get() != RunState::Transitioning;
        };
        info!(deploy = %self.deploy_name, "initializing engine");
        let mut ok = true;

        let source_instances: Vec<(String, ComponentConfig)> = self
            .config
            .sources
            .iter()
            .map(|(name, cfg)| (name.clone(), cfg.clone()))
            .collect();
        for (name, instance) in source_instances {
            match self.build_source(&name, &instance) {
                Some(host) => {
                    if host.initialize(&name).await {
                        self.sources.insert(name, host);
                    } else {
                        ok = false;
                    }
                }
                None => ok = false,
            }
        }

        let writer_instances: Vec<(String, ComponentConfig)> = self
            .config
            .writers
            .iter()
            .map(|(name, cfg)| (name.clone(), cfg.clone()))
            .collect();
        for (name, instance) in writer_instances {
            match self.build_writer(&name, &instance) {
                Some(host) => {
                    if host.initialize(&name).await {
                        self.writers.insert(name, host);
                    } else {
                        ok = false;
                    }
                }
                None => ok = false,
            }
        }

        let mut transformers: HashMap<String, Arc<dyn TransformerFactory>> = HashMap::new();
        for (logical, impl_id) in &self.config.types.transformers {
            match self.types.transformer(impl_id) {
                Some(factory) => {
                    transformers.insert(logical.to_lowercase(), factory);
                }
                None => {
                    error!(logical = %logical, impl_id = %impl_id, "unknown transformer type");
                    ok = false;
                }
            }
        }
        let directory = Arc::new(ComponentDirectory::new(
            self.sources.iter().map(|entry| entry.key().clone()).collect(),
            self.writers
                .iter()
                .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
                .collect(),
            transformers,
        ));
        self.router.bind(directory);
        ok &= self.router.initialize("router").await;

        if ok {
            self.cell.complete(RunState::Initialized);
            info!(
                deploy = %self.deploy_name,
                sources = self.sources.len(),
                writers = self.writers.len(),
                "engine initialized"
            );
        } else {
            self.cell.complete(RunState::FailedInitialization);
            error!(deploy = %self.deploy_name, "engine initialization failed");
        }
        ok
    }

    fn build_source(&self, name: &str, instance: &ComponentConfig) -> Option<Arc<SourceHost>> {
        if let Some(existing) = self.source(name) {
            return Some(existing);
        }
        let factory = match self.resolve(
            "source",
            name,
            instance,
            &self.config.types.data_sources,
            |impl_id| self.types.source(impl_id),
        ) {
            Ok(factory) => factory,
            Err(error) => {
                error!(source = name, %error, "source type resolution failed");
                return None;
            }
        };
        let backend = match factory.create(name, &instance.settings) {
            Ok(backend) => backend,
            Err(error) => {
                error!(source = name, %error, "source construction failed");
                return None;
            }
        };
        Some(Arc::new(SourceHost::new(
            backend,
            self.router(),
            self.settings.clone(),
        )))
    }

    fn build_writer(&self, name: &str, instance: &ComponentConfig) -> Option<Arc<WriterHost>> {
        if let Some(existing) = self.writer(name) {
            return Some(existing);
        }
        let factory = match self.resolve(
            "writer",
            name,
            instance,
            &self.config.types.data_writers,
            |impl_id| self.types.writer(impl_id),
        ) {
            Ok(factory) => factory,
            Err(error) => {
                error!(writer = name, %error, "writer type resolution failed");
                return None;
            }
        };
        let backend = match factory.create(name, &instance.settings) {
            Ok(backend) => backend,
            Err(error) => {
                error!(writer = name, %error, "writer construction failed");
                return None;
            }
        };
        Some(Arc::new(WriterHost::new(backend, self.settings.clone())))
    }

    /// Resolves instance → logical type → implementation factory. A broken
    /// chain is a configuration error: a missing `type` key, a logical name
    /// with no binding, or a binding pointing at an unregistered factory.
    fn resolve<F>(
        &self,
        kind: &'static str,
        name: &str,
        instance: &ComponentConfig,
        bindings: &HashMap<String, String>,
        lookup: impl FnOnce(&str) -> Option<F>,
    ) -> Result<F, ConfigError> {
        let logical = instance
            .kind
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::Invalid {
                field: format!("{kind} '{name}'"),
                reason: "missing 'type'".to_string(),
            })?;
        let impl_id = bindings.get(logical).ok_or_else(|| ConfigError::UnknownType {
            kind,
            type_id: logical.to_string(),
            name: name.to_string(),
        })?;
        lookup(impl_id).ok_or_else(|| ConfigError::UnknownType {
            kind,
            type_id: impl_id.clone(),
            name: name.to_string(),
        })
    }

    /// Starts the pipeline in dependency order: writers, router, sources;
    /// then launches the monitor. A failure anywhere leaves the engine
    /// `Failed`; `start` may be called again from there.
    pub async fn start(self: &Arc<Self>) -> bool {
        let Some(_) = self.cell.begin(RunState::can_start) else {
            return false;
        };
        let mut ok = true;
        for (name, writer) in self.writer_snapshot() {
            if !writer.start().await {
                error!(writer = %name, "writer failed to start");
                ok = false;
            }
        }
        if !self.router.start().await {
            error!("router failed to start");
            ok = false;
        }
        for (name, source) in self.source_snapshot() {
            if !source.start().await {
                error!(source = %name, "source failed to start");
                ok = false;
            }
        }
        if ok {
            self.cell.complete(RunState::Running);
            let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(stale) = monitor.take() {
                stale.abort();
            }
            *monitor = Some(tokio::spawn(monitor_loop(Arc::clone(self))));
            info!(deploy = %self.deploy_name, "engine running");
        } else {
            self.cell.complete(RunState::Failed);
            error!(deploy = %self.deploy_name, "engine start failed");
        }
        ok
    }

    /// Stops everything in reverse order: monitor, sources, router,
    /// writers. Any component stop failure leaves the engine `Failed`.
    pub async fn stop(&self) -> bool {
        let Some(_) = self.cell.begin(RunState::can_stop) else {
            return false;
        };
        info!(deploy = %self.deploy_name, "stopping engine");
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut monitor) = monitor {
            // The monitor notices the state change on its next pass.
            if timeout(self.settings.monitor_pace * 4, &mut monitor).await.is_err() {
                monitor.abort();
            }
        }
        let mut ok = true;
        for (name, source) in self.source_snapshot() {
            if source.state() == RunState::Running && !source.stop().await {
                error!(source = %name, "source failed to stop");
                ok = false;
            }
        }
        if self.router.state() == RunState::Running && !self.router.stop().await {
            error!("router failed to stop");
            ok = false;
        }
        for (name, writer) in self.writer_snapshot() {
            if writer.state() == RunState::Running && !writer.stop().await {
                error!(writer = %name, "writer failed to stop");
                ok = false;
            }
        }
        if ok {
            self.cell.complete(RunState::Stopped);
            info!(deploy = %self.deploy_name, "engine stopped");
        } else {
            self.cell.complete(RunState::Failed);
            error!(deploy = %self.deploy_name, "engine stop recorded failures");
        }
        ok
    }
}

/// Restarts any component observed `Failed` while the engine runs, pausing
/// between passes so the scan never busy-loops.
async fn monitor_loop(engine: Arc<IngestEngine>) {
    debug!("engine monitor started");
    while engine.cell.is_running() {
        for (name, writer) in engine.writer_snapshot() {
            if writer.state() == RunState::Failed {
                warn!(writer = %name, "restarting failed writer");
                writer.start().await;
            }
        }
        if engine.router.state() == RunState::Failed {
            warn!("restarting failed router");
            engine.router.start().await;
        }
        for (name, source) in engine.source_snapshot() {
            if source.state() == RunState::Failed {
                warn!(source = %name, "restarting failed source");
                source.start().await;
            }
        }
        tokio::time::sleep(engine.settings.monitor_pace).await;
    }
    debug!("engine monitor exited");
}
