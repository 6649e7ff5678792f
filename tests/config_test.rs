//! Configuration loading and the embedded route document.

use std::io::Write;

use ingestd::config::EngineConfig;
use ingestd::error::ConfigError;
use ingestd::registry::parse_route_document;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_a_full_deployment_document() {
    let file = write_config(
        r#"{
            "DeployName": "edge-fleet",
            "TargetThreads": 4,
            "Types": {
                "DataSources": {"mq": "mqtt"},
                "DataWriters": {"fn": "lambda"},
                "Transformers": {"reverser": "reverse"}
            },
            "Sources": {"plant-a": {"type": "mq", "host": "broker.local"}},
            "Writers": {"ingest-fn": {"type": "fn", "arn": "arn:aws:lambda:..."}},
            "Routes": {
                "plant-a": {
                    "sensors/*": {"destName": "ingest-fn", "destTopic": "telemetry", "batchSize": 10, "xformName": ""}
                }
            }
        }"#,
    );
    let config = EngineConfig::load(file.path()).expect("loads");
    assert_eq!(config.deploy_name().to_string(), "edge-fleet");
    assert_eq!(config.worker_count().as_usize(), 4);
    assert_eq!(config.types.data_sources["mq"], "mqtt");
    assert_eq!(
        config.sources["plant-a"].settings["host"],
        "broker.local"
    );

    let descriptors = parse_route_document(config.routes.as_ref().unwrap()).expect("routes parse");
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].dest_provider, "ingest-fn");
    assert_eq!(descriptors[0].max_batch_size.as_usize(), 10);
    assert!(!descriptors[0].has_transform());
}

#[test]
fn target_threads_defaults_when_missing_or_non_positive() {
    let missing = write_config(r#"{"DeployName": "d"}"#);
    assert_eq!(
        EngineConfig::load(missing.path()).unwrap().worker_count().as_usize(),
        3
    );
    let negative = write_config(r#"{"DeployName": "d", "TargetThreads": -2}"#);
    assert_eq!(
        EngineConfig::load(negative.path()).unwrap().worker_count().as_usize(),
        3
    );
}

#[test]
fn instance_missing_type_is_a_load_error() {
    let file = write_config(r#"{"Writers": {"w1": {"arn": "x"}}}"#);
    match EngineConfig::load(file.path()) {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "Writers.w1"),
        other => panic!("expected Invalid, got {other:?}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    match EngineConfig::load("/nonexistent/config.json") {
        Err(ConfigError::Io { .. }) => {}
        other => panic!("expected Io, got {other:?}"),
    }
}

#[test]
fn malformed_json_is_a_parse_error() {
    let file = write_config("{not json");
    assert!(matches!(
        EngineConfig::load(file.path()),
        Err(ConfigError::Parse { .. })
    ));
}
