//! ingestd - route-driven message ingest pipeline daemon
//!
//! Loads the deployment document, wires the built-in plug-in factories,
//! and runs the engine until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use ingestd::builtins;
use ingestd::config::{EngineConfig, RuntimeSettings};
use ingestd::engine::{IngestEngine, TypeRegistry};
use ingestd::registry::{MetaRegistry, StaticRegistry};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ingestd", version, about = "Route-driven message ingest pipeline daemon")]
struct Cli {
    /// Path to the deployment configuration document.
    #[arg(long, env = "INGESTD_CONFIG", default_value = "./config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ingestd=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!(path = %cli.config.display(), "loading configuration");
    let config = EngineConfig::load(&cli.config)?;

    let mut types = TypeRegistry::new();
    builtins::register_defaults(&mut types);

    let registry: Arc<dyn MetaRegistry> = match &config.routes {
        Some(doc) => Arc::new(StaticRegistry::from_document(doc)?),
        None => Arc::new(StaticRegistry::default()),
    };

    let engine = IngestEngine::new(config, types, registry, RuntimeSettings::default());
    if !engine.initialize().await {
        anyhow::bail!("engine initialization failed");
    }
    if !engine.start().await {
        anyhow::bail!("engine start failed");
    }
    info!(deploy = %engine.deploy_name(), "pipeline running; send SIGINT to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    if !engine.stop().await {
        error!("engine stop recorded failures");
        anyhow::bail!("engine stop recorded failures");
    }
    Ok(())
}
