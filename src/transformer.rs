//! Record transformers
//!
//! A transformer rewrites a record (or an ordered sequence of records)
//! before delivery. Transformers are pure rewrite functions resolved from an
//! explicit factory map: the route descriptor's `name:info` string selects
//! the factory by lowercased name and passes the remainder as its
//! initialization argument.

use std::sync::Arc;

use crate::error::PluginError;

/// A record rewrite function bound into a route.
///
/// Returning `None` means "nothing to forward": the record (or sequence)
/// was consumed deliberately, as a filtering transformer does.
pub trait Transformer: Send + Sync {
    /// Rewrites a single record.
    fn transform_one(&self, source: &str, topic: &str, record: String) -> Option<String>;

    /// Rewrites an ordered sequence of records.
    fn transform_many(&self, source: &str, topic: &str, records: Vec<String>) -> Option<Vec<String>>;
}

/// Builds an initialized transformer from the `info` portion of a route
/// descriptor's transform string.
pub trait TransformerFactory: Send + Sync {
    /// Creates a transformer initialized with `info`.
    ///
    /// # Errors
    /// Returns [`PluginError::Init`] when the transformer rejects `info`.
    fn create(&self, info: &str) -> Result<Arc<dyn Transformer>, PluginError>;
}
