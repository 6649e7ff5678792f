//! Shared fixtures: recording writer backends, scripted sources, and a
//! registry whose snapshot (or failure) tests control directly.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use ingestd::config::RuntimeSettings;
use ingestd::domain_types::MaxBatchSize;
use ingestd::engine::{ComponentDirectory, SourceFactory, WriterFactory};
use ingestd::error::{PluginError, RegistryError};
use ingestd::lifecycle::ComponentHandle;
use ingestd::registry::{MetaRegistry, RouteDescriptor};
use ingestd::router::IngestRouter;
use ingestd::source::SourceBackend;
use ingestd::transformer::TransformerFactory;
use ingestd::writer::{WriterBackend, WriterHost};

/// One delivery observed by a recording backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Text {
        source: String,
        topic: String,
        record: String,
    },
    TextBatch {
        source: String,
        topic: String,
        records: Vec<String>,
    },
    Binary {
        source: String,
        topic: String,
        payload: Bytes,
    },
    BinaryBatch {
        source: String,
        topic: String,
        payloads: Vec<Bytes>,
    },
}

/// Shared log of everything a recording backend delivered.
#[derive(Debug, Clone, Default)]
pub struct Recording(Arc<Mutex<Vec<Received>>>);

impl Recording {
    pub fn push(&self, item: Received) {
        self.0.lock().unwrap().push(item);
    }

    pub fn items(&self) -> Vec<Received> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Writer backend that records every delivery and accepts it.
pub struct RecordingBackend {
    recording: Recording,
}

impl RecordingBackend {
    pub fn new(recording: Recording) -> Self {
        Self { recording }
    }
}

#[async_trait]
impl WriterBackend for RecordingBackend {
    async fn initialize(&self, _ctx: ComponentHandle) -> bool {
        true
    }

    async fn write_text(&self, source: &str, topic: &str, record: String) -> bool {
        self.recording.push(Received::Text {
            source: source.into(),
            topic: topic.into(),
            record,
        });
        true
    }

    async fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        self.recording.push(Received::TextBatch {
            source: source.into(),
            topic: topic.into(),
            records,
        });
        true
    }

    async fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        self.recording.push(Received::Binary {
            source: source.into(),
            topic: topic.into(),
            payload,
        });
        true
    }

    async fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        self.recording.push(Received::BinaryBatch {
            source: source.into(),
            topic: topic.into(),
            payloads,
        });
        true
    }
}

/// Builds, initializes, and starts a recording writer host.
pub async fn recording_writer(name: &str) -> (Arc<WriterHost>, Recording) {
    let recording = Recording::default();
    let host = Arc::new(WriterHost::new(
        Arc::new(RecordingBackend::new(recording.clone())),
        RuntimeSettings::fast(),
    ));
    assert!(host.initialize(name).await);
    assert!(host.start().await);
    (host, recording)
}

/// Factory handing out recording writers and remembering their logs by
/// instance name.
#[derive(Clone, Default)]
pub struct RecordingWriterFactory {
    recordings: Arc<Mutex<HashMap<String, Recording>>>,
}

impl RecordingWriterFactory {
    pub fn recording(&self, name: &str) -> Recording {
        self.recordings
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .expect("writer was constructed")
    }
}

impl WriterFactory for RecordingWriterFactory {
    fn create(
        &self,
        name: &str,
        _settings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<dyn WriterBackend>, PluginError> {
        let recording = Recording::default();
        self.recordings
            .lock()
            .unwrap()
            .insert(name.to_string(), recording.clone());
        Ok(Arc::new(RecordingBackend::new(recording)))
    }
}

/// One record a scripted source emits at startup.
#[derive(Debug, Clone)]
pub enum Emit {
    Text(&'static str, &'static str),
    TextBatch(&'static str, Vec<&'static str>),
    Binary(&'static str, &'static [u8]),
}

/// Source backend that emits a fixed script, then idles until stopped.
pub struct ScriptedSource {
    script: Mutex<Vec<Emit>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Emit>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }
}

#[async_trait]
impl SourceBackend for ScriptedSource {
    async fn initialize(&self, _ctx: ComponentHandle) -> bool {
        true
    }

    async fn run(&self, ctx: ComponentHandle, router: Arc<IngestRouter>) {
        let script: Vec<Emit> = self.script.lock().unwrap().drain(..).collect();
        for emit in script {
            match emit {
                Emit::Text(topic, record) => {
                    router.write_text(ctx.name(), topic, record.to_string());
                }
                Emit::TextBatch(topic, records) => {
                    router.write_text_batch(
                        ctx.name(),
                        topic,
                        records.into_iter().map(str::to_string).collect(),
                    );
                }
                Emit::Binary(topic, payload) => {
                    router.write_binary(ctx.name(), topic, Bytes::from_static(payload));
                }
            }
        }
        while ctx.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Factory mapping instance names to their scripts.
#[derive(Clone, Default)]
pub struct ScriptedSourceFactory {
    scripts: Arc<Mutex<HashMap<String, Vec<Emit>>>>,
}

impl ScriptedSourceFactory {
    pub fn with_script(self, name: &str, script: Vec<Emit>) -> Self {
        self.scripts.lock().unwrap().insert(name.to_string(), script);
        self
    }
}

impl SourceFactory for ScriptedSourceFactory {
    fn create(
        &self,
        name: &str,
        _settings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<dyn SourceBackend>, PluginError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(name)
            .unwrap_or_default();
        Ok(Arc::new(ScriptedSource::new(script)))
    }
}

/// Registry whose snapshot the test flips between descriptor sets and
/// injected failures.
pub struct SwitchableRegistry {
    state: Mutex<Result<Vec<RouteDescriptor>, String>>,
}

impl SwitchableRegistry {
    pub fn serving(descriptors: Vec<RouteDescriptor>) -> Self {
        Self {
            state: Mutex::new(Ok(descriptors)),
        }
    }

    pub fn set_descriptors(&self, descriptors: Vec<RouteDescriptor>) {
        *self.state.lock().unwrap() = Ok(descriptors);
    }

    pub fn set_failure(&self, reason: &str) {
        *self.state.lock().unwrap() = Err(reason.to_string());
    }
}

#[async_trait]
impl MetaRegistry for SwitchableRegistry {
    async fn initialize(&self) -> bool {
        true
    }

    async fn fetch(&self) -> Result<Vec<RouteDescriptor>, RegistryError> {
        self.state
            .lock()
            .unwrap()
            .clone()
            .map_err(|reason| RegistryError::Fetch { reason })
    }
}

/// Builds a descriptor the way route documents spell them.
pub fn descriptor(
    source: &str,
    source_topic: &str,
    dest: &str,
    dest_topic: &str,
    batch: i64,
    xform: &str,
) -> RouteDescriptor {
    RouteDescriptor {
        source_provider: source.to_string(),
        source_topic: source_topic.to_string(),
        dest_provider: dest.to_string(),
        dest_topic: dest_topic.to_string(),
        max_batch_size: MaxBatchSize::clamped(batch),
        transform_meta: if xform.is_empty() {
            None
        } else {
            Some(xform.to_string())
        },
    }
}

/// Builds a directory over the given sources and writers, with the
/// passthrough and reverser transformers available.
pub fn directory(sources: &[&str], writers: &[(&str, Arc<WriterHost>)]) -> ComponentDirectory {
    let mut transformers: HashMap<String, Arc<dyn TransformerFactory>> = HashMap::new();
    transformers.insert(
        "passthrough".to_string(),
        Arc::new(ingestd::builtins::PassthroughFactory),
    );
    transformers.insert(
        "reverser".to_string(),
        Arc::new(ingestd::builtins::ReverseFactory),
    );
    ComponentDirectory::new(
        sources.iter().map(|s| (*s).to_string()).collect::<HashSet<_>>(),
        writers
            .iter()
            .map(|(name, host)| ((*name).to_string(), Arc::clone(host)))
            .collect(),
        transformers,
    )
}

/// Polls `cond` until it holds or a three second deadline expires.
pub async fn eventually(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
