//! Staging queues for pending records
//!
//! A [`WorkPool`] holds four independent FIFO queues, one per payload
//! variant. Producers enqueue from any task; consumers poll non-blockingly
//! across all four and park on [`WorkPool::wait`] when everything is empty.
//! The queues are unbounded: sources are expected to self-limit, and there
//! is deliberately no backpressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

/// An immutable `(source, topic, payload)` triple.
///
/// `source` names the producing ingest source; `topic` is the fully
/// qualified topic string that source observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTuple<P> {
    /// Name of the producing ingest source.
    pub source: String,
    /// Fully qualified topic the record arrived on.
    pub topic: String,
    /// The record itself.
    pub payload: P,
}

impl<P> MessageTuple<P> {
    /// Builds a tuple from its parts.
    pub fn new(source: impl Into<String>, topic: impl Into<String>, payload: P) -> Self {
        Self {
            source: source.into(),
            topic: topic.into(),
            payload,
        }
    }
}

/// A record popped from one of the pool's four queues.
#[derive(Debug, Clone)]
pub enum PooledRecord {
    /// Single text record.
    Text(MessageTuple<String>),
    /// Ordered sequence of text records.
    TextBatch(MessageTuple<Vec<String>>),
    /// Single binary record.
    Binary(MessageTuple<Bytes>),
    /// Ordered sequence of binary records.
    BinaryBatch(MessageTuple<Vec<Bytes>>),
}

/// Four-queue staging area shared by producers and consumers.
#[derive(Debug, Default)]
pub struct WorkPool {
    text: Mutex<VecDeque<MessageTuple<String>>>,
    text_batch: Mutex<VecDeque<MessageTuple<Vec<String>>>>,
    binary: Mutex<VecDeque<MessageTuple<Bytes>>>,
    binary_batch: Mutex<VecDeque<MessageTuple<Vec<Bytes>>>>,
    pending: AtomicUsize,
    notify: Notify,
}

fn push<P>(queue: &Mutex<VecDeque<MessageTuple<P>>>, tuple: MessageTuple<P>) {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push_back(tuple);
}

fn pop<P>(queue: &Mutex<VecDeque<MessageTuple<P>>>) -> Option<MessageTuple<P>> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

impl WorkPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueued(&self) {
        self.pending.fetch_add(1, Ordering::Release);
        self.notify.notify_one();
    }

    /// Enqueues a single text record.
    pub fn write_text(&self, source: &str, topic: &str, record: String) -> bool {
        push(&self.text, MessageTuple::new(source, topic, record));
        self.enqueued();
        true
    }

    /// Enqueues an ordered sequence of text records.
    pub fn write_text_batch(&self, source: &str, topic: &str, records: Vec<String>) -> bool {
        push(&self.text_batch, MessageTuple::new(source, topic, records));
        self.enqueued();
        true
    }

    /// Enqueues a single binary record.
    pub fn write_binary(&self, source: &str, topic: &str, payload: Bytes) -> bool {
        push(&self.binary, MessageTuple::new(source, topic, payload));
        self.enqueued();
        true
    }

    /// Enqueues an ordered sequence of binary records.
    pub fn write_binary_batch(&self, source: &str, topic: &str, payloads: Vec<Bytes>) -> bool {
        push(&self.binary_batch, MessageTuple::new(source, topic, payloads));
        self.enqueued();
        true
    }

    /// Pops the next pending record, checking the four queues in a fixed
    /// order: text, text sequences, binary, binary sequences.
    pub fn poll(&self) -> Option<PooledRecord> {
        let record = pop(&self.text)
            .map(PooledRecord::Text)
            .or_else(|| pop(&self.text_batch).map(PooledRecord::TextBatch))
            .or_else(|| pop(&self.binary).map(PooledRecord::Binary))
            .or_else(|| pop(&self.binary_batch).map(PooledRecord::BinaryBatch));
        if record.is_some() {
            self.pending.fetch_sub(1, Ordering::Release);
        }
        record
    }

    /// Parks the caller until a record is enqueued or `timeout` elapses.
    ///
    /// Consumers call this after an empty [`poll`] instead of spinning; a
    /// bounded timeout keeps shutdown observation prompt even if a wakeup
    /// is missed.
    ///
    /// [`poll`]: WorkPool::poll
    pub async fn wait(&self, timeout: Duration) {
        if self.pending.load(Ordering::Acquire) > 0 {
            return;
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    /// Wakes every parked consumer, typically on shutdown.
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Number of records currently staged across all four queues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True when no records are staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_queue_is_fifo() {
        let pool = WorkPool::new();
        for i in 0..4 {
            pool.write_text("s", "t", format!("r{i}"));
        }
        for i in 0..4 {
            match pool.poll() {
                Some(PooledRecord::Text(tuple)) => assert_eq!(tuple.payload, format!("r{i}")),
                other => panic!("expected text record, got {other:?}"),
            }
        }
        assert!(pool.poll().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn poll_order_is_text_then_batches_then_binary() {
        let pool = WorkPool::new();
        pool.write_binary_batch("s", "t", vec![Bytes::from_static(b"b")]);
        pool.write_binary("s", "t", Bytes::from_static(b"a"));
        pool.write_text_batch("s", "t", vec!["seq".into()]);
        pool.write_text("s", "t", "one".into());

        assert!(matches!(pool.poll(), Some(PooledRecord::Text(_))));
        assert!(matches!(pool.poll(), Some(PooledRecord::TextBatch(_))));
        assert!(matches!(pool.poll(), Some(PooledRecord::Binary(_))));
        assert!(matches!(pool.poll(), Some(PooledRecord::BinaryBatch(_))));
    }

    #[test]
    fn per_producer_insertion_order_is_preserved() {
        let pool = std::sync::Arc::new(WorkPool::new());
        let producers = 4;
        let per_producer = 50;
        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..per_producer {
                        pool.write_text(&format!("src{p}"), "t", format!("{p}:{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last_seen = vec![-1i64; producers];
        let mut total = 0;
        while let Some(PooledRecord::Text(tuple)) = pool.poll() {
            let (p, i) = tuple.payload.split_once(':').unwrap();
            let (p, i): (usize, i64) = (p.parse().unwrap(), i.parse().unwrap());
            assert!(i > last_seen[p], "producer {p} order violated");
            last_seen[p] = i;
            total += 1;
        }
        assert_eq!(total, producers * per_producer);
    }

    #[tokio::test]
    async fn wait_returns_promptly_once_notified() {
        let pool = std::sync::Arc::new(WorkPool::new());
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.wait(Duration::from_secs(5)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.write_text("s", "t", "wake".into());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake well before the 5s timeout")
            .unwrap();
    }
}
