//! Route bindings
//!
//! A [`TransformerWriter`] is what a route resolves to: an optional
//! transformer, the destination writer, the destination topic, and the
//! batch bound. It is the only object router workers invoke to dispatch a
//! record. Sequence inputs are partitioned into contiguous chunks of at
//! most `max_batch_size` records; each chunk is materialized before it is
//! handed onward, so the asynchronous consumer never borrows from the
//! upstream iterator. Binary payloads round-trip through base64 only when
//! a transformer sits on the path.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec;
use crate::domain_types::MaxBatchSize;
use crate::lifecycle::RunState;
use crate::transformer::Transformer;
use crate::writer::WriterHost;

/// Binding of an optional transformer to a destination writer and topic.
pub struct TransformerWriter {
    transformer: Option<Arc<dyn Transformer>>,
    writer: Arc<WriterHost>,
    dest_provider: String,
    dest_topic: String,
    max_batch_size: MaxBatchSize,
}

impl fmt::Debug for TransformerWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerWriter")
            .field("dest_provider", &self.dest_provider)
            .field("dest_topic", &self.dest_topic)
            .field("max_batch_size", &self.max_batch_size)
            .field("transformed", &self.transformer.is_some())
            .finish()
    }
}

impl TransformerWriter {
    /// Builds a binding. A `None` transformer means pass-through.
    #[must_use]
    pub fn new(
        transformer: Option<Arc<dyn Transformer>>,
        writer: Arc<WriterHost>,
        dest_provider: impl Into<String>,
        dest_topic: impl Into<String>,
        max_batch_size: MaxBatchSize,
    ) -> Self {
        Self {
            transformer,
            writer,
            dest_provider: dest_provider.into(),
            dest_topic: dest_topic.into(),
            max_batch_size,
        }
    }

    /// Name of the destination writer.
    #[must_use]
    pub fn dest_provider(&self) -> &str {
        &self.dest_provider
    }

    /// Topic the destination writer publishes on.
    #[must_use]
    pub fn dest_topic(&self) -> &str {
        &self.dest_topic
    }

    /// Batch bound; zero disables batching.
    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size.as_usize()
    }

    /// The binding has no runloop of its own; its observable state is the
    /// destination writer's.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.writer.state()
    }

    /// Delivers a single text record, transformed when a transformer is
    /// bound. A transformer returning `None` produced a null record;
    /// nothing is forwarded and the write reports failure.
    pub fn write_text(&self, source: &str, topic: &str, record: String) -> bool {
        match &self.transformer {
            None => self.writer.write_text(source, &self.dest_topic, record),
            Some(transformer) => match transformer.transform_one(source, topic, record) {
                Some(out) => self.writer.write_text(source, &self.dest_topic, out),
                None => {
                    debug!(source, topic, "transformer returned no record; rejected");
                    false
                }
            },
        }
    }

    /// Delivers an ordered sequence of text records, chunked by the batch
    /// bound. Returns the conjunction of the per-chunk results; an empty
    /// sequence succeeds without touching the destination.
    pub fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        if records.is_empty() {
            return true;
        }
        match self.max_batch_size.as_usize() {
            0 => self.forward_text_chunk(source, topic, records),
            k => partition(records, k)
                .into_iter()
                .fold(true, |ok, chunk| ok & self.forward_text_chunk(source, topic, chunk)),
        }
    }

    fn forward_text_chunk(&self, source: &str, topic: &str, chunk: Vec<String>) -> bool {
        match &self.transformer {
            None => self.writer.write_text_batch(source, &self.dest_topic, chunk),
            Some(transformer) => match transformer.transform_many(source, topic, chunk) {
                Some(out) => self.writer.write_text_batch(source, &self.dest_topic, out),
                None => {
                    debug!(source, topic, "transformer consumed batch");
                    true
                }
            },
        }
    }

    /// Delivers a single binary record. Pass-through paths skip the base64
    /// round-trip entirely.
    pub fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        match &self.transformer {
            None => self.writer.write_binary(source, &self.dest_topic, payload),
            Some(transformer) => {
                let encoded = codec::binary_to_text(&payload);
                match transformer.transform_one(source, topic, encoded) {
                    Some(out) => match codec::text_to_binary_b64(&out) {
                        Ok(bytes) => self.writer.write_binary(source, &self.dest_topic, bytes),
                        Err(error) => {
                            warn!(source, topic, %error, "transformer produced invalid base64; record dropped");
                            false
                        }
                    },
                    None => {
                        debug!(source, topic, "transformer returned no record; rejected");
                        false
                    }
                }
            }
        }
    }

    /// Delivers an ordered sequence of binary records, chunked by the
    /// batch bound. On transformed paths each chunk is carried through the
    /// lazy base64 adapters and materialized before it is handed onward.
    pub fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        if payloads.is_empty() {
            return true;
        }
        match self.max_batch_size.as_usize() {
            0 => self.forward_binary_chunk(source, topic, payloads),
            k => partition(payloads, k)
                .into_iter()
                .fold(true, |ok, chunk| ok & self.forward_binary_chunk(source, topic, chunk)),
        }
    }

    fn forward_binary_chunk(&self, source: &str, topic: &str, chunk: Vec<Bytes>) -> bool {
        let Some(transformer) = &self.transformer else {
            return self.writer.write_binary_batch(source, &self.dest_topic, chunk);
        };
        let encoded: Vec<String> = codec::encode_seq(chunk).collect();
        match transformer.transform_many(source, topic, encoded) {
            Some(out) => match codec::decode_seq(out).collect::<Result<Vec<Bytes>, _>>() {
                Ok(decoded) => self
                    .writer
                    .write_binary_batch(source, &self.dest_topic, decoded),
                Err(error) => {
                    warn!(source, topic, %error, "transformer produced invalid base64; batch dropped");
                    false
                }
            },
            None => {
                debug!(source, topic, "transformer consumed batch");
                true
            }
        }
    }
}

/// Splits `items` into contiguous chunks of at most `k` elements,
/// preserving order. `k` must be positive.
pub(crate) fn partition<T>(items: Vec<T>, k: usize) -> Vec<Vec<T>> {
    debug_assert!(k > 0);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(k));
    let mut chunk = Vec::with_capacity(k.min(items.len()));
    for item in items {
        chunk.push(item);
        if chunk.len() == k {
            chunks.push(std::mem::replace(&mut chunk, Vec::with_capacity(k)));
        }
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn partition_keeps_order_and_bounds() {
        let chunks = partition(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    proptest! {
        #[test]
        fn partition_concatenation_is_identity(items in proptest::collection::vec(any::<u16>(), 0..64), k in 1usize..10) {
            let chunks = partition(items.clone(), k);
            prop_assert_eq!(chunks.len(), items.len().div_ceil(k));
            for chunk in &chunks {
                prop_assert!(chunk.len() <= k);
            }
            let rejoined: Vec<u16> = chunks.into_iter().flatten().collect();
            prop_assert_eq!(rejoined, items);
        }
    }
}
