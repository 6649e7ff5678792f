//! In-memory route table
//!
//! A [`RouteTable`] is the materialization of the registry's descriptor
//! set: a two-level `(source, topic)` map whose leaves are immutable
//! [`WriterHandler`]s. Instances are write-once-then-readable: the router
//! clones the published table, reconciles the clone against a fresh
//! descriptor list, and publishes the clone in one atomic swap. Readers
//! never observe a half-updated table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::ComponentDirectory;
use crate::registry::RouteDescriptor;
use crate::transformer_writer::TransformerWriter;

/// Resolved binding for one `(source, topic)` route. Immutable after
/// insertion, so clones of the table alias the same binding.
#[derive(Debug, Clone)]
pub struct WriterHandler {
    /// Lowercased transformer name, when the route rewrites records.
    pub transform_name: Option<String>,
    /// The binding workers dispatch through.
    pub writer: Arc<TransformerWriter>,
}

/// Matches an incoming topic against a registered topic key.
///
/// Match is exact unless the registered key ends in `/*`, in which case it
/// matches the stripped prefix itself and anything nested below it:
/// `a/b/*` matches `a/b`, `a/b/c`, and `a/b/anything`, but not `a/bc`.
#[must_use]
pub fn topic_match(incoming: &str, registered: &str) -> bool {
    match registered.strip_suffix("/*") {
        Some(prefix) => incoming
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        None => incoming == registered,
    }
}

/// Two-level `source → topic → handler` routing map.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, HashMap<String, WriterHandler>>,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles the table against a fresh descriptor set.
    ///
    /// Each descriptor whose source and destination writer are known to the
    /// directory is inserted (or replaces the existing entry). Afterwards
    /// every `(source, topic)` absent from the descriptor list is pruned,
    /// and sources left without topics are removed.
    pub fn update_routes(&mut self, descriptors: &[RouteDescriptor], directory: &ComponentDirectory) {
        for descriptor in descriptors {
            if !directory.has_source(&descriptor.source_provider) {
                debug!(
                    source = %descriptor.source_provider,
                    topic = %descriptor.source_topic,
                    "descriptor names an unknown source; skipped"
                );
                continue;
            }
            let Some(writer) = directory.writer(&descriptor.dest_provider) else {
                debug!(
                    source = %descriptor.source_provider,
                    dest = %descriptor.dest_provider,
                    "descriptor names an unknown writer; skipped"
                );
                continue;
            };
            let transform_name = descriptor.transform_name();
            let transformer = match &transform_name {
                Some(name) => {
                    match directory.make_transformer(name, descriptor.transform_info()) {
                        Ok(transformer) => Some(transformer),
                        Err(error) => {
                            warn!(
                                source = %descriptor.source_provider,
                                topic = %descriptor.source_topic,
                                %error,
                                "transformer unavailable; route skipped"
                            );
                            continue;
                        }
                    }
                }
                None => None,
            };
            let binding = Arc::new(TransformerWriter::new(
                transformer,
                writer,
                descriptor.dest_provider.clone(),
                descriptor.dest_topic.clone(),
                descriptor.max_batch_size,
            ));
            self.routes
                .entry(descriptor.source_provider.clone())
                .or_default()
                .insert(
                    descriptor.source_topic.clone(),
                    WriterHandler {
                        transform_name,
                        writer: binding,
                    },
                );
        }

        let keep: HashSet<(&str, &str)> = descriptors
            .iter()
            .map(|d| (d.source_provider.as_str(), d.source_topic.as_str()))
            .collect();
        self.routes.retain(|source, topics| {
            topics.retain(|topic, _| keep.contains(&(source.as_str(), topic.as_str())));
            !topics.is_empty()
        });
    }

    /// Resolves the binding for `(source, topic)`.
    ///
    /// The exact topic key wins; otherwise the first matching `/*` key in
    /// scan order is taken. Overlapping wildcard precedence is unspecified;
    /// callers should avoid overlapping wildcards.
    #[must_use]
    pub fn lookup(&self, source: &str, topic: &str) -> Option<WriterHandler> {
        let topics = self.routes.get(source)?;
        if let Some(handler) = topics.get(topic) {
            return Some(handler.clone());
        }
        topics
            .iter()
            .find(|(registered, _)| registered.ends_with("/*") && topic_match(topic, registered))
            .map(|(_, handler)| handler.clone())
    }

    /// Number of `(source, topic)` routes currently held.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    /// True when no routes are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Names of the sources that currently have at least one route.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }
}
