//! Destination writers
//!
//! A [`WriterHost`] owns the lifecycle state machine and the staging
//! [`WorkPool`] for one destination writer; the injected [`WriterBackend`]
//! supplies the concrete delivery hooks. The four `write_*` entry points
//! only enqueue and return immediately; a single consumer task launched by
//! `start` drains the queues and invokes the backend.
//!
//! Backends that speak only one payload family implement [`TextSink`] or
//! [`BinarySink`] and are wrapped by the codec adapters: [`TextWriter`]
//! carries binary payloads across as base64, [`BinaryWriter`] carries text
//! across as its UTF-8 encoding.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::RuntimeSettings;
use crate::lifecycle::{ComponentHandle, LifecycleCell, RunState};
use crate::work_pool::{PooledRecord, WorkPool};

/// Delivery hooks of a concrete destination writer.
///
/// Hooks are invoked from the host's consumer task, one record at a time.
/// A hook returns false to drop the record; a backend that cannot continue
/// at all calls [`ComponentHandle::set_failed`] so the supervisor restarts
/// it.
#[async_trait]
pub trait WriterBackend: Send + Sync {
    /// Prepares the backend. The handle stays valid for the component's
    /// whole life and is the backend's failure signal.
    async fn initialize(&self, ctx: ComponentHandle) -> bool;

    /// Delivers a single text record.
    async fn write_text(&self, source: &str, topic: &str, record: String) -> bool;

    /// Delivers an ordered sequence of text records.
    async fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool;

    /// Delivers a single binary record.
    async fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool;

    /// Delivers an ordered sequence of binary records.
    async fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool;

    /// Releases external resources after the consumer has exited.
    async fn shutdown(&self) -> bool {
        true
    }
}

/// A text-only delivery target.
#[async_trait]
pub trait TextSink: Send + Sync {
    /// Prepares the sink.
    async fn initialize(&self, _ctx: ComponentHandle) -> bool {
        true
    }

    /// Delivers one text record.
    async fn write(&self, source: &str, topic: &str, record: String) -> bool;

    /// Delivers a sequence of text records; defaults to record-at-a-time.
    async fn write_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        let mut ok = true;
        for record in records {
            ok &= self.write(source, topic, record).await;
        }
        ok
    }

    /// Releases external resources.
    async fn shutdown(&self) -> bool {
        true
    }
}

/// A binary-only delivery target.
#[async_trait]
pub trait BinarySink: Send + Sync {
    /// Prepares the sink.
    async fn initialize(&self, _ctx: ComponentHandle) -> bool {
        true
    }

    /// Delivers one binary record.
    async fn write(&self, source: &str, topic: &str, payload: Bytes) -> bool;

    /// Delivers a sequence of binary records; defaults to record-at-a-time.
    async fn write_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        let mut ok = true;
        for payload in payloads {
            ok &= self.write(source, topic, payload).await;
        }
        ok
    }

    /// Releases external resources.
    async fn shutdown(&self) -> bool {
        true
    }
}

/// Adapts a [`TextSink`] to the full backend interface; binary payloads are
/// delivered as base64 text.
pub struct TextWriter<S> {
    sink: S,
}

impl<S> TextWriter<S> {
    /// Wraps a text sink.
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S: TextSink> WriterBackend for TextWriter<S> {
    async fn initialize(&self, ctx: ComponentHandle) -> bool {
        self.sink.initialize(ctx).await
    }

    async fn write_text(&self, source: &str, topic: &str, record: String) -> bool {
        self.sink.write(source, topic, record).await
    }

    async fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        self.sink.write_batch(source, topic, records).await
    }

    async fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        self.sink
            .write(source, topic, codec::binary_to_text(&payload))
            .await
    }

    async fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        let records: Vec<String> = codec::encode_seq(payloads).collect();
        self.sink.write_batch(source, topic, records).await
    }

    async fn shutdown(&self) -> bool {
        self.sink.shutdown().await
    }
}

/// Adapts a [`BinarySink`] to the full backend interface; text payloads are
/// delivered as their UTF-8 encoding.
pub struct BinaryWriter<S> {
    sink: S,
}

impl<S> BinaryWriter<S> {
    /// Wraps a binary sink.
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S: BinarySink> WriterBackend for BinaryWriter<S> {
    async fn initialize(&self, ctx: ComponentHandle) -> bool {
        self.sink.initialize(ctx).await
    }

    async fn write_text(&self, source: &str, topic: &str, record: String) -> bool {
        self.sink
            .write(source, topic, codec::text_to_binary(&record))
            .await
    }

    async fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        let payloads: Vec<Bytes> = records.iter().map(|r| codec::text_to_binary(r)).collect();
        self.sink.write_batch(source, topic, payloads).await
    }

    async fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        self.sink.write(source, topic, payload).await
    }

    async fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        self.sink.write_batch(source, topic, payloads).await
    }

    async fn shutdown(&self) -> bool {
        self.sink.shutdown().await
    }
}

/// Lifecycle host for one destination writer.
pub struct WriterHost {
    name: OnceLock<String>,
    backend: Arc<dyn WriterBackend>,
    pool: Arc<WorkPool>,
    cell: Arc<LifecycleCell>,
    settings: RuntimeSettings,
    consumer: Mutex<Option<JoinHandle<()>>>,
    drops: Arc<AtomicU64>,
}

impl WriterHost {
    /// Creates a host around `backend` in the `Created` state.
    #[must_use]
    pub fn new(backend: Arc<dyn WriterBackend>, settings: RuntimeSettings) -> Self {
        Self {
            name: OnceLock::new(),
            backend,
            pool: Arc::new(WorkPool::new()),
            cell: Arc::new(LifecycleCell::new()),
            settings,
            consumer: Mutex::new(None),
            drops: Arc::new(AtomicU64::new(0)),
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

    /// Records dropped because the backend refused them.
    #[must_use]
    pub fn dropped_records(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
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
            debug!(writer = name, "writer initialized");
        } else {
            self.cell.complete(RunState::FailedInitialization);
            error!(writer = name, "writer backend failed to initialize");
        }
        ok
    }

    /// Launches the consumer task. Legal from `Initialized`, `Stopped`, and
    /// `Failed`.
    pub async fn start(&self) -> bool {
        let mut consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(_) = self.cell.begin(RunState::can_start) else {
            return false;
        };
        if let Some(stale) = consumer.take() {
            stale.abort();
        }
        self.cell.complete(RunState::Running);
        *consumer = Some(tokio::spawn(consume(
            self.name().to_string(),
            Arc::clone(&self.backend),
            Arc::clone(&self.pool),
            Arc::clone(&self.cell),
            Arc::clone(&self.drops),
            self.settings.clone(),
        )));
        info!(writer = %self.name(), "writer started");
        true
    }

    /// Stops the consumer: a cooperative window, then the backend's
    /// shutdown hook, then cancellation with a bounded grace period.
    /// Records still staged when the consumer exits are lost.
    pub async fn stop(&self) -> bool {
        let Some(_) = self.cell.begin(RunState::can_stop) else {
            return false;
        };
        self.pool.wake_all();
        let mut handle = self
            .consumer
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
                    error!(writer = %self.name(), "consumer still running after cancellation grace");
                }
            }
        }
        let lost = self.pool.len();
        if lost > 0 {
            warn!(writer = %self.name(), lost, "staged records discarded on stop");
        }
        self.cell.complete(RunState::Stopped);
        info!(writer = %self.name(), "writer stopped");
        backend_ok && terminated
    }

    /// Signals that the writer cannot continue; the supervisor restarts it.
    pub fn set_failed(&self) -> bool {
        let failed = self.cell.set_failed();
        if failed {
            warn!(writer = %self.name(), "writer marked failed");
        }
        failed
    }

    /// Stages a single text record for delivery.
    pub fn write_text(&self, source: &str, topic: &str, record: String) -> bool {
        self.pool.write_text(source, topic, record)
    }

    /// Stages an ordered sequence of text records for delivery.
    pub fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        self.pool.write_text_batch(source, topic, records)
    }

    /// Stages a single binary record for delivery.
    pub fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        self.pool.write_binary(source, topic, payload)
    }

    /// Stages an ordered sequence of binary records for delivery.
    pub fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        self.pool.write_binary_batch(source, topic, payloads)
    }
}

async fn consume(
    name: String,
    backend: Arc<dyn WriterBackend>,
    pool: Arc<WorkPool>,
    cell: Arc<LifecycleCell>,
    drops: Arc<AtomicU64>,
    settings: RuntimeSettings,
) {
    debug!(writer = %name, "consumer loop started");
    while cell.is_running() {
        match pool.poll() {
            Some(record) => {
                let ok = match record {
                    PooledRecord::Text(t) => {
                        backend.write_text(&t.source, &t.topic, t.payload).await
                    }
                    PooledRecord::TextBatch(t) => {
                        backend.write_text_batch(&t.source, &t.topic, t.payload).await
                    }
                    PooledRecord::Binary(t) => {
                        backend.write_binary(&t.source, &t.topic, t.payload).await
                    }
                    PooledRecord::BinaryBatch(t) => {
                        backend
                            .write_binary_batch(&t.source, &t.topic, t.payload)
                            .await
                    }
                };
                if !ok {
                    drops.fetch_add(1, Ordering::Relaxed);
                    warn!(writer = %name, "backend refused record; dropped");
                }
            }
            None => pool.wait(settings.idle_wait).await,
        }
    }
    debug!(writer = %name, "consumer loop exited");
}
