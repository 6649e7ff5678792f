//! Ingest sources
//!
//! A [`SourceHost`] runs one producer backend: `start` spawns the backend's
//! `run` loop as a dedicated task that pushes records into the router, and
//! `stop` waits for the loop to observe the state change before cancelling
//! it. Sources own no staging pool; the router stages everything.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeSettings;
use crate::lifecycle::{ComponentHandle, LifecycleCell, RunState};
use crate::router::IngestRouter;

/// Producer hooks of a concrete ingest source.
#[async_trait]
pub trait SourceBackend: Send + Sync {
    /// Prepares the backend (connects, subscribes). The handle stays valid
    /// for the component's whole life and is the backend's failure signal.
    async fn initialize(&self, ctx: ComponentHandle) -> bool;

    /// Produces records until `ctx.is_running()` turns false, delivering
    /// each via the router's `write_*` entry points. Returning while the
    /// component is still `Running` marks the source failed.
    async fn run(&self, ctx: ComponentHandle, router: Arc<IngestRouter>);

    /// Releases external resources after the producer has exited.
    async fn shutdown(&self) -> bool {
        true
    }
}

/// Lifecycle host for one ingest source.
pub struct SourceHost {
    name: OnceLock<String>,
    backend: Arc<dyn SourceBackend>,
    router: Arc<IngestRouter>,
    cell: Arc<LifecycleCell>,
    settings: RuntimeSettings,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl SourceHost {
    /// Creates a host around `backend` in the `Created` state.
    #[must_use]
    pub fn new(
        backend: Arc<dyn SourceBackend>,
        router: Arc<IngestRouter>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            name: OnceLock::new(),
            backend,
            router,
            cell: Arc::new(LifecycleCell::new()),
            settings,
            producer: Mutex::new(None),
        }
    }

    /// The instance name assigned at initialization.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.get().map_or("", String::as_str)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.cell.get()
    }

    /// Initializes the backend under `name`. Idempotent after success.
    pub async fn initialize(&self, name: &str) -> bool {
        let Some(_) = self.cell.begin(RunState::can_initialize) else {
            return self.cell.get() != RunState::Transitioning;
        };
        let _ = self.name.set(name.to_string());
        let ctx = ComponentHandle::new(name, Arc::clone(&self.cell));
        let ok = self.backend.initialize(ctx).await;
        if ok {
            self.cell.complete(RunState::Initialized);
            debug!(source = name, "source initialized");
        } else {
            self.cell.complete(RunState::FailedInitialization);
            error!(source = name, "source backend failed to initialize");
        }
        ok
    }

    /// Launches the producer task. Legal from `Initialized`, `Stopped`, and
    /// `Failed`.
    pub async fn start(&self) -> bool {
        let mut producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(_) = self.cell.begin(RunState::can_start) else {
            return false;
        };
        if let Some(stale) = producer.take() {
            stale.abort();
        }
        self.cell.complete(RunState::Running);
        let name = self.name().to_string();
        let ctx = ComponentHandle::new(name.clone(), Arc::clone(&self.cell));
        let backend = Arc::clone(&self.backend);
        let router = Arc::clone(&self.router);
        let cell = Arc::clone(&self.cell);
        *producer = Some(tokio::spawn(async move {
            debug!(source = %name, "producer loop started");
            backend.run(ctx, router).await;
            if cell.is_running() {
                warn!(source = %name, "producer exited while running; marking failed");
                cell.set_failed();
            }
            debug!(source = %name, "producer loop exited");
        }));
        info!(source = %self.name(), "source started");
        true
    }

    /// Stops the producer: a cooperative window, then the backend's
    /// shutdown hook, then cancellation with a bounded grace period.
    pub async fn stop(&self) -> bool {
        let Some(_) = self.cell.begin(RunState::can_stop) else {
            return false;
        };
        let mut handle = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut terminated = match handle.as_mut() {
            Some(h) => timeout(self.settings.stop_window(), h).await.is_ok(),
            None => true,
        };
        let backend_ok = self.backend.shutdown().await;
        if !terminated {
            if let Some(mut h) = handle.take() {
                h.abort();
                terminated = timeout(self.settings.join_grace, &mut h).await.is_ok();
                if !terminated {
                    error!(source = %self.name(), "producer still running after cancellation grace");
                }
            }
        }
        self.cell.complete(RunState::Stopped);
        info!(source = %self.name(), "source stopped");
        backend_ok && terminated
    }

    /// Signals that the source cannot continue; the supervisor restarts it.
    pub fn set_failed(&self) -> bool {
        let failed = self.cell.set_failed();
        if failed {
            warn!(source = %self.name(), "source marked failed");
        }
        failed
    }
}
