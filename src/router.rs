//! Concurrent dispatch core
//!
//! The [`IngestRouter`] owns the pre-routing staging pool, a scavenger
//! worker per configured thread, one refresher task, and the atomically
//! published [`RouteTable`]. Sources push records in through the `write_*`
//! entry points; scavengers pop them, resolve the route against the current
//! table snapshot, and dispatch through the bound [`TransformerWriter`].
//! Unrouteable records and writer failures are counted, logged, and
//! dropped — delivery is at-most-once by design.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwap;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::config::RuntimeSettings;
use crate::engine::ComponentDirectory;
use crate::lifecycle::{LifecycleCell, RunState};
use crate::registry::MetaRegistry;
use crate::route_table::RouteTable;
use crate::work_pool::{MessageTuple, PooledRecord, WorkPool};

/// Counters for records that left the happy path.
#[derive(Debug, Default)]
struct Counters {
    routed: AtomicU64,
    unrouteable: AtomicU64,
    dispatch_failures: AtomicU64,
}

/// Point-in-time snapshot of the router's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Records dispatched to a binding that accepted them.
    pub routed: u64,
    /// Records dropped because no route matched.
    pub unrouteable: u64,
    /// Records dropped because the bound writer refused them.
    pub dispatch_failures: u64,
}

/// The routing dataplane.
pub struct IngestRouter {
    name: OnceLock<String>,
    cell: Arc<LifecycleCell>,
    pool: Arc<WorkPool>,
    table: Arc<ArcSwap<RouteTable>>,
    registry: Arc<dyn MetaRegistry>,
    directory: OnceLock<Arc<ComponentDirectory>>,
    settings: RuntimeSettings,
    last_refresh: Arc<Mutex<Instant>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl IngestRouter {
    /// Creates a router in the `Created` state.
    #[must_use]
    pub fn new(registry: Arc<dyn MetaRegistry>, settings: RuntimeSettings) -> Self {
        Self {
            name: OnceLock::new(),
            cell: Arc::new(LifecycleCell::new()),
            pool: Arc::new(WorkPool::new()),
            table: Arc::new(ArcSwap::from_pointee(RouteTable::new())),
            registry,
            directory: OnceLock::new(),
            settings,
            last_refresh: Arc::new(Mutex::new(Instant::now())),
            workers: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Supplies the component directory routes resolve against. Must be
    /// called before `initialize`; later calls are ignored.
    pub fn bind(&self, directory: Arc<ComponentDirectory>) {
        let _ = self.directory.set(directory);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.cell.get()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            routed: self.counters.routed.load(Ordering::Relaxed),
            unrouteable: self.counters.unrouteable.load(Ordering::Relaxed),
            dispatch_failures: self.counters.dispatch_failures.load(Ordering::Relaxed),
        }
    }

    /// The currently published route table.
    #[must_use]
    pub fn current_table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Number of records staged and not yet scavenged.
    #[must_use]
    pub fn staged_records(&self) -> usize {
        self.pool.len()
    }

    /// Initializes the registry and performs the first refresh. Idempotent
    /// after success.
    pub async fn initialize(&self, name: &str) -> bool {
        let Some(_) = self.cell.begin(RunState::can_initialize) else {
            return self.cell.get() != RunState::Transitioning;
        };
        let _ = self.name.set(name.to_string());
        if self.directory.get().is_none() {
            error!(router = name, "no component directory bound");
            self.cell.complete(RunState::FailedInitialization);
            return false;
        }
        if !self.registry.initialize().await {
            error!(router = name, "route registry failed to initialize");
            self.cell.complete(RunState::FailedInitialization);
            return false;
        }
        // First refresh; a failed fetch just leaves the table empty until
        // the refresher's next attempt.
        self.refresh().await;
        self.cell.complete(RunState::Initialized);
        debug!(router = name, threads = self.settings.target_threads.as_usize(), "router initialized");
        true
    }

    /// Rebuilds and republishes the route table from a fresh registry
    /// snapshot: clone the current table, reconcile the clone, swap it in.
    /// A failed fetch retains the previous table and returns false.
    pub async fn refresh(&self) -> bool {
        let Some(directory) = self.directory.get() else {
            return false;
        };
        refresh_table(
            &self.table,
            self.registry.as_ref(),
            directory,
            &self.last_refresh,
        )
        .await
    }

    /// Spawns the refresher and the scavenger pool. Legal from
    /// `Initialized`, `Stopped`, and `Failed`.
    pub async fn start(&self) -> bool {
        let Some(directory) = self.directory.get().cloned() else {
            return false;
        };
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(_) = self.cell.begin(RunState::can_start) else {
            return false;
        };
        for stale in workers.drain(..) {
            stale.abort();
        }
        self.cell.complete(RunState::Running);

        workers.push(tokio::spawn(refresher(
            Arc::clone(&self.cell),
            Arc::clone(&self.table),
            Arc::clone(&self.registry),
            directory,
            Arc::clone(&self.last_refresh),
            self.settings.clone(),
        )));
        for worker in 0..self.settings.target_threads.as_usize() {
            workers.push(tokio::spawn(scavenge(
                worker,
                Arc::clone(&self.cell),
                Arc::clone(&self.pool),
                Arc::clone(&self.table),
                Arc::clone(&self.counters),
                self.settings.clone(),
            )));
        }
        info!(
            router = %self.name.get().map_or("", String::as_str),
            workers = self.settings.target_threads.as_usize(),
            "router started"
        );
        true
    }

    /// Stops the worker pool: wake everyone, drain within the window, then
    /// cancel stragglers with a bounded grace. Staged records are lost.
    pub async fn stop(&self) -> bool {
        let Some(_) = self.cell.begin(RunState::can_stop) else {
            return false;
        };
        self.pool.wake_all();
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let deadline = Instant::now() + self.settings.drain_window;
        let mut forced = 0usize;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                forced += 1;
                if timeout(self.settings.join_grace, &mut handle).await.is_err() {
                    error!("router worker still running after cancellation grace");
                }
            }
        }
        let lost = self.pool.len();
        if forced > 0 || lost > 0 {
            warn!(forced, lost, "router stopped with work outstanding");
        }
        self.cell.complete(RunState::Stopped);
        info!(router = %self.name.get().map_or("", String::as_str), "router stopped");
        true
    }

    /// Stages a single text record for routing.
    pub fn write_text(&self, source: &str, topic: &str, record: String) -> bool {
        self.pool.write_text(source, topic, record)
    }

    /// Stages an ordered sequence of text records for routing.
    pub fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        self.pool.write_text_batch(source, topic, records)
    }

    /// Stages a single binary record for routing.
    pub fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        self.pool.write_binary(source, topic, payload)
    }

    /// Stages an ordered sequence of binary records for routing.
    pub fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        self.pool.write_binary_batch(source, topic, payloads)
    }
}

/// Clone-reconcile-swap against a fresh registry snapshot.
async fn refresh_table(
    table: &ArcSwap<RouteTable>,
    registry: &dyn MetaRegistry,
    directory: &ComponentDirectory,
    last_refresh: &Mutex<Instant>,
) -> bool {
    let mut working = RouteTable::clone(&table.load());
    match registry.fetch().await {
        Ok(descriptors) => {
            working.update_routes(&descriptors, directory);
            let routes = working.route_count();
            table.store(Arc::new(working));
            *last_refresh.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
            info!(routes, "route table refreshed");
            true
        }
        Err(error) => {
            error!(%error, "route refresh failed; retaining previous table");
            false
        }
    }
}

/// Periodically re-checks table staleness while the router runs.
async fn refresher(
    cell: Arc<LifecycleCell>,
    table: Arc<ArcSwap<RouteTable>>,
    registry: Arc<dyn MetaRegistry>,
    directory: Arc<ComponentDirectory>,
    last_refresh: Arc<Mutex<Instant>>,
    settings: RuntimeSettings,
) {
    debug!("route refresher started");
    while cell.is_running() {
        tokio::time::sleep(settings.refresh_tick).await;
        if !cell.is_running() {
            break;
        }
        let stale = last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            > settings.refresh_interval;
        if stale {
            refresh_table(&table, registry.as_ref(), &directory, &last_refresh).await;
        }
    }
    debug!("route refresher exited");
}

/// Worker loop: pop, resolve, dispatch.
async fn scavenge(
    worker: usize,
    cell: Arc<LifecycleCell>,
    pool: Arc<WorkPool>,
    table: Arc<ArcSwap<RouteTable>>,
    counters: Arc<Counters>,
    settings: RuntimeSettings,
) {
    debug!(worker, "scavenger started");
    while cell.is_running() {
        match pool.poll() {
            Some(record) => dispatch(record, &table.load(), &counters),
            None => pool.wait(settings.idle_wait).await,
        }
    }
    debug!(worker, "scavenger exited");
}

fn dispatch(record: PooledRecord, table: &RouteTable, counters: &Counters) {
    match record {
        PooledRecord::Text(t) => route(table, counters, t, |handler, t| {
            handler.writer.write_text(&t.source, &t.topic, t.payload)
        }),
        PooledRecord::TextBatch(t) => route(table, counters, t, |handler, t| {
            handler.writer.write_text_batch(&t.source, &t.topic, t.payload)
        }),
        PooledRecord::Binary(t) => route(table, counters, t, |handler, t| {
            handler.writer.write_binary(&t.source, &t.topic, t.payload)
        }),
        PooledRecord::BinaryBatch(t) => route(table, counters, t, |handler, t| {
            handler.writer.write_binary_batch(&t.source, &t.topic, t.payload)
        }),
    }
}

fn route<P>(
    table: &RouteTable,
    counters: &Counters,
    tuple: MessageTuple<P>,
    deliver: impl FnOnce(&crate::route_table::WriterHandler, MessageTuple<P>) -> bool,
) {
    let Some(handler) = table.lookup(&tuple.source, &tuple.topic) else {
        counters.unrouteable.fetch_add(1, Ordering::Relaxed);
        trace!(source = %tuple.source, topic = %tuple.topic, "no route; record dropped");
        return;
    };
    let source = tuple.source.clone();
    let topic = tuple.topic.clone();
    if deliver(&handler, tuple) {
        counters.routed.fetch_add(1, Ordering::Relaxed);
    } else {
        counters.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            source = %source,
            topic = %topic,
            dest = %handler.writer.dest_provider(),
            "writer dispatch failed; record dropped"
        );
    }
}
