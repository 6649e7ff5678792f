//! Route registry interface and descriptor model
//!
//! The registry is the authoritative out-of-band source of routing policy.
//! Implementations return a snapshot of [`RouteDescriptor`]s on every fetch;
//! the router reconciles its table against that snapshot. A failed fetch
//! always leaves the previously published table in place.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain_types::MaxBatchSize;
use crate::error::RegistryError;

/// One routing rule: records arriving from `source_provider` on
/// `source_topic` are delivered to `dest_provider` on `dest_topic`,
/// optionally rewritten by the transformer named in `transform_meta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    /// Name of the ingest source the rule applies to.
    pub source_provider: String,
    /// Topic (exact or `/*` suffix wildcard) the rule applies to.
    pub source_topic: String,
    /// Name of the destination writer.
    pub dest_provider: String,
    /// Topic the destination writer publishes on.
    pub dest_topic: String,
    /// Transformer batch bound; zero disables batching.
    pub max_batch_size: MaxBatchSize,
    /// `"name:info"` transform selector; empty or absent means pass-through.
    pub transform_meta: Option<String>,
}

impl RouteDescriptor {
    /// True when the rule names a transformer.
    #[must_use]
    pub fn has_transform(&self) -> bool {
        self.transform_meta.as_deref().is_some_and(|meta| !meta.is_empty())
    }

    /// The transformer name: the substring before the first `:`, lowercased.
    #[must_use]
    pub fn transform_name(&self) -> Option<String> {
        let meta = self.transform_meta.as_deref().filter(|meta| !meta.is_empty())?;
        let name = meta.split_once(':').map_or(meta, |(name, _)| name);
        Some(name.to_lowercase())
    }

    /// The transformer initialization argument: everything after the first
    /// `:`, or the empty string when there is none.
    #[must_use]
    pub fn transform_info(&self) -> &str {
        self.transform_meta
            .as_deref()
            .and_then(|meta| meta.split_once(':'))
            .map_or("", |(_, info)| info)
    }
}

/// Authoritative producer of the current route descriptor set.
#[async_trait]
pub trait MetaRegistry: Send + Sync {
    /// Prepares the registry for fetching. Returns false when the registry
    /// cannot be reached or configured.
    async fn initialize(&self) -> bool;

    /// Returns a snapshot of every routing rule currently in force.
    ///
    /// # Errors
    /// Returns [`RegistryError`] when the snapshot could not be produced;
    /// the caller retains its previous table.
    async fn fetch(&self) -> Result<Vec<RouteDescriptor>, RegistryError>;
}

/// Wire entry of the remote route-configuration document.
#[derive(Debug, Deserialize)]
struct WireRoute {
    #[serde(rename = "destName")]
    dest_name: String,
    #[serde(rename = "destTopic")]
    dest_topic: String,
    #[serde(rename = "batchSize", default)]
    batch_size: i64,
    #[serde(rename = "xformName", default)]
    xform_name: Option<String>,
}

/// Parses a route-configuration document of the shape
/// `{"<source>": {"<topic>": {"destName", "destTopic", "batchSize",
/// "xformName"}, …}, …}` into descriptors.
///
/// A document carrying `errorMessage` is the remote's failure signal and
/// yields [`RegistryError::Remote`].
///
/// # Errors
/// Returns [`RegistryError`] on a failure signal or a malformed document.
pub fn parse_route_document(
    doc: &serde_json::Value,
) -> Result<Vec<RouteDescriptor>, RegistryError> {
    if let Some(message) = doc.get("errorMessage") {
        return Err(RegistryError::Remote {
            message: message.as_str().unwrap_or("unspecified").to_string(),
        });
    }
    let sources = doc.as_object().ok_or_else(|| RegistryError::Fetch {
        reason: "route document is not an object".to_string(),
    })?;

    let mut descriptors = Vec::new();
    for (source, topics) in sources {
        let topics = topics.as_object().ok_or_else(|| RegistryError::Fetch {
            reason: format!("route entry for source '{source}' is not an object"),
        })?;
        for (topic, entry) in topics {
            let wire: WireRoute = serde_json::from_value(entry.clone())?;
            descriptors.push(RouteDescriptor {
                source_provider: source.clone(),
                source_topic: topic.clone(),
                dest_provider: wire.dest_name,
                dest_topic: wire.dest_topic,
                max_batch_size: MaxBatchSize::clamped(wire.batch_size),
                transform_meta: wire.xform_name,
            });
        }
    }
    Ok(descriptors)
}

/// A registry serving a fixed descriptor list, typically parsed from the
/// deployment configuration's `Routes` section.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    descriptors: Mutex<Vec<RouteDescriptor>>,
}

impl StaticRegistry {
    /// Creates a registry serving `descriptors` on every fetch.
    #[must_use]
    pub fn new(descriptors: Vec<RouteDescriptor>) -> Self {
        Self {
            descriptors: Mutex::new(descriptors),
        }
    }

    /// Creates a registry from a route-configuration document.
    ///
    /// # Errors
    /// Returns [`RegistryError`] when the document does not parse.
    pub fn from_document(doc: &serde_json::Value) -> Result<Self, RegistryError> {
        Ok(Self::new(parse_route_document(doc)?))
    }

    /// Replaces the served descriptor set; the next router refresh picks it
    /// up.
    pub fn replace(&self, descriptors: Vec<RouteDescriptor>) {
        *self
            .descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = descriptors;
    }
}

#[async_trait]
impl MetaRegistry for StaticRegistry {
    async fn initialize(&self) -> bool {
        true
    }

    async fn fetch(&self) -> Result<Vec<RouteDescriptor>, RegistryError> {
        Ok(self
            .descriptors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(meta: Option<&str>) -> RouteDescriptor {
        RouteDescriptor {
            source_provider: "src".into(),
            source_topic: "t".into(),
            dest_provider: "w".into(),
            dest_topic: "u".into(),
            max_batch_size: MaxBatchSize::clamped(0),
            transform_meta: meta.map(str::to_string),
        }
    }

    #[test]
    fn transform_meta_splits_on_first_colon() {
        let d = descriptor(Some("Schema:a:b"));
        assert!(d.has_transform());
        assert_eq!(d.transform_name().as_deref(), Some("schema"));
        assert_eq!(d.transform_info(), "a:b");
    }

    #[test]
    fn empty_or_absent_meta_means_pass_through() {
        assert!(!descriptor(None).has_transform());
        assert!(!descriptor(Some("")).has_transform());
        assert_eq!(descriptor(Some("")).transform_name(), None);
    }

    #[test]
    fn meta_without_colon_has_empty_info() {
        let d = descriptor(Some("reverser"));
        assert_eq!(d.transform_name().as_deref(), Some("reverser"));
        assert_eq!(d.transform_info(), "");
    }

    #[test]
    fn parses_wire_document() {
        let doc = json!({
            "src1": {
                "t/x": {"destName": "w1", "destTopic": "u/y", "batchSize": 2, "xformName": "reverser:"},
                "t/*": {"destName": "w2", "destTopic": "out", "batchSize": -3}
            }
        });
        let mut descriptors = parse_route_document(&doc).unwrap();
        descriptors.sort_by(|a, b| a.source_topic.cmp(&b.source_topic));
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].source_topic, "t/*");
        assert_eq!(descriptors[0].max_batch_size.as_usize(), 0);
        assert!(!descriptors[0].has_transform());
        assert_eq!(descriptors[1].dest_provider, "w1");
        assert_eq!(descriptors[1].max_batch_size.as_usize(), 2);
        assert_eq!(descriptors[1].transform_name().as_deref(), Some("reverser"));
    }

    #[test]
    fn error_message_is_a_remote_failure() {
        let doc = json!({"errorMessage": "access denied"});
        assert!(matches!(
            parse_route_document(&doc),
            Err(RegistryError::Remote { .. })
        ));
    }
}
