//! Error types for the ingest pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating the deployment configuration.
///
/// Configuration errors are fatal: the engine stays in
/// `FailedInitialization` until a corrected document is supplied.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration parse error: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("unknown {kind} type '{type_id}' for instance '{name}'")]
    UnknownType {
        kind: &'static str,
        type_id: String,
        name: String,
    },
}

/// Errors raised by route-registry implementations.
///
/// Any fetch error leaves the previously published route table in place.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry fetch failed: {reason}")]
    Fetch { reason: String },

    #[error("registry returned error: {message}")]
    Remote { message: String },

    #[error("malformed route document: {source}")]
    Malformed {
        #[from]
        source: serde_json::Error,
    },
}

/// Errors raised while constructing or initializing a plug-in.
///
/// Runtime plug-in failures never travel as error values: a write hook
/// refuses a record with `false`, and a backend that cannot continue
/// signals `set_failed` so the supervisor restarts it.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{name}' failed to initialize: {reason}")]
    Init { name: String, reason: String },
}
