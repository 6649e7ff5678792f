//! # ingestd - route-driven message ingest pipeline
//!
//! A long-lived daemon that receives records from named external sources,
//! matches each record against a dynamically maintained `(source, topic)`
//! route table, optionally rewrites it through a named transformer, and
//! delivers the result to a named destination writer. The route table is
//! refreshed from an out-of-band registry, so routing and transformation
//! policy changes without restarting the process.
//!
//! ## Architecture
//!
//! ```text
//! Source -> IngestRouter -> RouteTable -> TransformerWriter -> WriterHost -> sink
//!              |                ^
//!              v                |
//!          WorkPool      MetaRegistry (periodic refresh, atomic swap)
//! ```
//!
//! The [`engine::IngestEngine`] is the composition root: it builds sources
//! and writers from an explicit factory registry, starts everything in
//! dependency order, and restarts components that fail. Delivery is
//! at-most-once: there is no durable queue and no backpressure, and records
//! with no matching route are counted and dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ingestd::config::{EngineConfig, RuntimeSettings};
//! use ingestd::engine::{IngestEngine, TypeRegistry};
//! use ingestd::registry::StaticRegistry;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = EngineConfig::load("./config.json").expect("config");
//! let mut types = TypeRegistry::new();
//! ingestd::builtins::register_defaults(&mut types);
//! let registry = Arc::new(StaticRegistry::default());
//! let engine = IngestEngine::new(config, types, registry, RuntimeSettings::default());
//! engine.initialize().await;
//! engine.start().await;
//! # }
//! ```

pub mod builtins;
pub mod codec;
pub mod config;
pub mod domain_types;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod route_table;
pub mod router;
pub mod source;
pub mod transformer;
pub mod transformer_writer;
pub mod work_pool;
pub mod writer;

pub use crate::config::{EngineConfig, RuntimeSettings};
pub use crate::domain_types::{DeployName, MaxBatchSize, WorkerCount};
pub use crate::engine::{ComponentDirectory, IngestEngine, SourceFactory, TypeRegistry, WriterFactory};
pub use crate::error::{ConfigError, PluginError, RegistryError};
pub use crate::lifecycle::{ComponentHandle, RunState};
pub use crate::registry::{MetaRegistry, RouteDescriptor, StaticRegistry};
pub use crate::route_table::{RouteTable, WriterHandler, topic_match};
pub use crate::router::{IngestRouter, RouterStats};
pub use crate::source::{SourceBackend, SourceHost};
pub use crate::transformer::{Transformer, TransformerFactory};
pub use crate::transformer_writer::TransformerWriter;
pub use crate::work_pool::{MessageTuple, PooledRecord, WorkPool};
pub use crate::writer::{BinarySink, BinaryWriter, TextSink, TextWriter, WriterBackend, WriterHost};
