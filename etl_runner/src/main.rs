//! Entry point wiring a validated pipeline configuration into a running
//! `PipelineController` and driving it until a shutdown signal arrives,
//! grounded on `siem_clickhouse_ingestion`'s and `siem_consumer`'s `main.rs`.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use etl_bus::{Bus, InMemoryBus};
use etl_sink::ChPool;
use etl_supervisor::PipelineController;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SINK_POOL_SIZE: usize = 8;

#[derive(Parser, Debug)]
#[command(about = "Runs a streaming ETL pipeline: Kafka ingest, optional dedup and join, ClickHouse sink")]
struct Args {
    /// Path to the pipeline configuration file (overrides ETL_CONFIG_PATH).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "etl_runner=info,etl_supervisor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("starting pipeline runner");

    let pipeline_config = match &args.config {
        Some(path) => config::load_from_file(path)?,
        None => config::load_with_overrides()?,
    };
    info!(pipeline_id = %pipeline_config.pipeline_id, "configuration loaded");

    let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
    let sink_pool = Arc::new(
        ChPool::new(&pipeline_config.sink, SINK_POOL_SIZE)
            .context("failed to initialize ClickHouse connection pool")?,
    );

    let controller = Arc::new(
        PipelineController::new(&pipeline_config, bus, sink_pool)
            .context("failed to construct pipeline controller")?,
    );

    controller.start().await.context("failed to start pipeline")?;
    info!("pipeline running, waiting for shutdown signal");

    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping pipeline"),
        Err(err) => error!(error = %err, "unable to listen for shutdown signal"),
    }

    controller.stop().await.context("failed to stop pipeline cleanly")?;
    info!("pipeline stopped");

    Ok(())
}
