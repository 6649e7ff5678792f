//! Built-in plug-ins
//!
//! A small set of vendor-free plug-ins so a deployment document can run a
//! whole pipeline out of the box: a console writer that emits records
//! through the log stream, a ticker source for smoke-testing routes, and
//! the passthrough/reverse transformers. External integrations register
//! their own factories alongside these.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::engine::{SourceFactory, TypeRegistry, WriterFactory};
use crate::error::PluginError;
use crate::lifecycle::ComponentHandle;
use crate::router::IngestRouter;
use crate::source::SourceBackend;
use crate::transformer::{Transformer, TransformerFactory};
use crate::writer::{TextSink, TextWriter, WriterBackend};

/// Text sink that emits every record through the log stream.
pub struct ConsoleSink {
    prefix: Option<String>,
}

#[async_trait]
impl TextSink for ConsoleSink {
    async fn write(&self, source: &str, topic: &str, record: String) -> bool {
        match &self.prefix {
            Some(prefix) => info!(source, topic, "{prefix}{record}"),
            None => info!(source, topic, "{record}"),
        }
        true
    }
}

/// Factory for [`ConsoleSink`] writers; honors an optional `prefix` setting.
pub struct ConsoleWriterFactory;

impl WriterFactory for ConsoleWriterFactory {
    fn create(
        &self,
        _name: &str,
        settings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<dyn WriterBackend>, PluginError> {
        let prefix = settings
            .get("prefix")
            .and_then(|value| value.as_str())
            .map(str::to_string);
        Ok(Arc::new(TextWriter::new(ConsoleSink { prefix })))
    }
}

/// Source that emits a numbered text record on a fixed period. Useful for
/// exercising a deployment before its real sources are wired up.
pub struct TickerSource {
    topic: String,
    period: Duration,
    emitted: AtomicU64,
}

#[async_trait]
impl SourceBackend for TickerSource {
    async fn initialize(&self, _ctx: ComponentHandle) -> bool {
        true
    }

    async fn run(&self, ctx: ComponentHandle, router: Arc<IngestRouter>) {
        while ctx.is_running() {
            let n = self.emitted.fetch_add(1, Ordering::Relaxed);
            router.write_text(ctx.name(), &self.topic, format!("tick {n}"));
            tokio::time::sleep(self.period).await;
        }
    }
}

/// Factory for [`TickerSource`]; honors `topic` and `periodMs` settings.
pub struct TickerSourceFactory;

impl SourceFactory for TickerSourceFactory {
    fn create(
        &self,
        _name: &str,
        settings: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<dyn SourceBackend>, PluginError> {
        let topic = settings
            .get("topic")
            .and_then(|value| value.as_str())
            .unwrap_or("ticks")
            .to_string();
        let period = settings
            .get("periodMs")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(1000);
        Ok(Arc::new(TickerSource {
            topic,
            period: Duration::from_millis(period),
            emitted: AtomicU64::new(0),
        }))
    }
}

/// Identity transformer.
pub struct PassthroughTransformer;

impl Transformer for PassthroughTransformer {
    fn transform_one(&self, _source: &str, _topic: &str, record: String) -> Option<String> {
        Some(record)
    }

    fn transform_many(
        &self,
        _source: &str,
        _topic: &str,
        records: Vec<String>,
    ) -> Option<Vec<String>> {
        Some(records)
    }
}

/// Factory for [`PassthroughTransformer`].
pub struct PassthroughFactory;

impl TransformerFactory for PassthroughFactory {
    fn create(&self, _info: &str) -> Result<Arc<dyn Transformer>, PluginError> {
        Ok(Arc::new(PassthroughTransformer))
    }
}

/// Transformer that reverses the characters of every record.
pub struct ReverseTransformer;

impl Transformer for ReverseTransformer {
    fn transform_one(&self, _source: &str, _topic: &str, record: String) -> Option<String> {
        Some(record.chars().rev().collect())
    }

    fn transform_many(
        &self,
        source: &str,
        topic: &str,
        records: Vec<String>,
    ) -> Option<Vec<String>> {
        Some(
            records
                .into_iter()
                .filter_map(|record| self.transform_one(source, topic, record))
                .collect(),
        )
    }
}

/// Factory for [`ReverseTransformer`].
pub struct ReverseFactory;

impl TransformerFactory for ReverseFactory {
    fn create(&self, _info: &str) -> Result<Arc<dyn Transformer>, PluginError> {
        Ok(Arc::new(ReverseTransformer))
    }
}

/// Registers every built-in plug-in under its implementation identifier.
pub fn register_defaults(types: &mut TypeRegistry) {
    types.register_writer("console", Arc::new(ConsoleWriterFactory));
    types.register_source("ticker", Arc::new(TickerSourceFactory));
    types.register_transformer("passthrough", Arc::new(PassthroughFactory));
    types.register_transformer("reverse", Arc::new(ReverseFactory));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_transformer_reverses_each_record() {
        let t = ReverseTransformer;
        assert_eq!(t.transform_one("s", "t", "abc".into()), Some("cba".into()));
        assert_eq!(
            t.transform_many("s", "t", vec!["ab".into(), "cd".into()]),
            Some(vec!["ba".into(), "dc".into()])
        );
    }
}
