//! Writer host runloop: lifecycle legality, queue draining, codec
//! adapters, and failure/restart behavior.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use common::{Received, Recording, RecordingBackend, eventually, recording_writer};
use ingestd::codec;
use ingestd::config::RuntimeSettings;
use ingestd::lifecycle::{ComponentHandle, RunState};
use ingestd::writer::{BinarySink, BinaryWriter, TextSink, TextWriter, WriterBackend, WriterHost};

#[tokio::test]
async fn lifecycle_requests_are_rejected_out_of_order() {
    let host = WriterHost::new(
        Arc::new(RecordingBackend::new(Recording::default())),
        RuntimeSettings::fast(),
    );
    // Nothing is legal from Created except initialize.
    assert!(!host.start().await);
    assert!(!host.stop().await);
    assert_eq!(host.state(), RunState::Created);

    assert!(host.initialize("w1").await);
    assert_eq!(host.state(), RunState::Initialized);
    // Initialize is idempotent after success.
    assert!(host.initialize("w1").await);
    assert!(!host.stop().await);

    assert!(host.start().await);
    assert_eq!(host.state(), RunState::Running);
    assert!(host.initialize("w1").await);

    assert!(host.stop().await);
    assert_eq!(host.state(), RunState::Stopped);
    assert!(!host.stop().await);
    // A stopped writer restarts.
    assert!(host.start().await);
    assert!(host.stop().await);
}

#[tokio::test]
async fn consumer_drains_all_four_queue_kinds() {
    let (host, recording) = recording_writer("w1").await;
    assert!(host.write_text("s", "t", "one".into()));
    assert!(host.write_text_batch("s", "t", vec!["a".into(), "b".into()]));
    assert!(host.write_binary("s", "t", Bytes::from_static(b"\x01")));
    assert!(host.write_binary_batch("s", "t", vec![Bytes::from_static(b"\x02")]));
    eventually(|| recording.len() == 4, "all four variants delivered").await;
    assert!(host.stop().await);
}

#[tokio::test]
async fn set_failed_leaves_running_and_restart_resumes_delivery() {
    let (host, recording) = recording_writer("w1").await;
    assert!(host.set_failed());
    assert_eq!(host.state(), RunState::Failed);

    // Records staged while failed are delivered after the restart.
    assert!(host.write_text("s", "t", "queued".into()));
    assert!(host.start().await);
    eventually(|| recording.len() == 1, "post-restart delivery").await;
    assert!(host.stop().await);
}

/// Text sink that records what it sees; used to observe the codec shims.
#[derive(Clone, Default)]
struct TextRecording(Recording);

#[async_trait]
impl TextSink for TextRecording {
    async fn write(&self, source: &str, topic: &str, record: String) -> bool {
        self.0.push(Received::Text {
            source: source.into(),
            topic: topic.into(),
            record,
        });
        true
    }
}

#[tokio::test]
async fn text_writer_carries_binary_payloads_as_base64() {
    let sink = TextRecording::default();
    let host = WriterHost::new(
        Arc::new(TextWriter::new(sink.clone())),
        RuntimeSettings::fast(),
    );
    assert!(host.initialize("w1").await);
    assert!(host.start().await);

    let payload = Bytes::from_static(b"\x00\xff\x10");
    assert!(host.write_binary("s", "t", payload.clone()));
    eventually(|| sink.0.len() == 1, "converted delivery").await;
    match &sink.0.items()[0] {
        Received::Text { record, .. } => {
            assert_eq!(codec::text_to_binary_b64(record).unwrap(), payload);
        }
        other => panic!("expected text, got {other:?}"),
    }
    assert!(host.stop().await);
}

/// Binary sink that records what it sees.
#[derive(Clone, Default)]
struct BinaryRecording(Recording);

#[async_trait]
impl BinarySink for BinaryRecording {
    async fn write(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        self.0.push(Received::Binary {
            source: source.into(),
            topic: topic.into(),
            payload,
        });
        true
    }
}

#[tokio::test]
async fn binary_writer_carries_text_payloads_as_utf8() {
    let sink = BinaryRecording::default();
    let host = WriterHost::new(
        Arc::new(BinaryWriter::new(sink.clone())),
        RuntimeSettings::fast(),
    );
    assert!(host.initialize("w1").await);
    assert!(host.start().await);

    assert!(host.write_text("s", "t", "héllo".into()));
    eventually(|| sink.0.len() == 1, "converted delivery").await;
    match &sink.0.items()[0] {
        Received::Binary { payload, .. } => {
            assert_eq!(payload, &Bytes::copy_from_slice("héllo".as_bytes()));
        }
        other => panic!("expected binary, got {other:?}"),
    }
    assert!(host.stop().await);
}

/// Backend whose shutdown hook records that it ran.
struct CountingShutdown {
    inner: RecordingBackend,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl WriterBackend for CountingShutdown {
    async fn initialize(&self, ctx: ComponentHandle) -> bool {
        self.inner.initialize(ctx).await
    }

    async fn write_text(&self, source: &str, topic: &str, record: String) -> bool {
        self.inner.write_text(source, topic, record).await
    }

    async fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        self.inner.write_text_batch(source, topic, records).await
    }

    async fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        self.inner.write_binary(source, topic, payload).await
    }

    async fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        self.inner.write_binary_batch(source, topic, payloads).await
    }

    async fn shutdown(&self) -> bool {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[tokio::test]
async fn stop_invokes_the_backend_shutdown_hook() {
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let host = WriterHost::new(
        Arc::new(CountingShutdown {
            inner: RecordingBackend::new(Recording::default()),
            shutdowns: shutdowns.clone(),
        }),
        RuntimeSettings::fast(),
    );
    assert!(host.initialize("w1").await);
    assert!(host.start().await);
    assert!(host.stop().await);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
}
