//! watchme-pipeline - WatchMe media-analysis pipeline
//!
//! `serve` hosts the HTTP ingestion surface and every queue consumer
//! (dispatcher, stage workers, coordinator, relays) in one process.
//! `weekly-profile` runs the weekly profile job once and exits.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use watchme_common::config::TomlConfig;
use watchme_common::store::{InMemoryStatusStore, RestStatusStore, StatusStore};
use watchme_common::upstream::UpstreamClient;
use watchme_pipeline::endpoints::PipelineApi;
use watchme_pipeline::runtime::ConsumerPool;
use watchme_pipeline::weekly::WeeklyProfileJob;
use watchme_pipeline::{build_router, Pipeline};

/// Command-line arguments for watchme-pipeline
#[derive(Parser, Debug)]
#[command(name = "watchme-pipeline")]
#[command(about = "WatchMe audio analysis pipeline")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, global = true, env = "WATCHME_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP surface and all queue consumers
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run the weekly profile job once
    WeeklyProfile {
        /// Devices to process (defaults to [weekly] device_ids)
        #[arg(long, value_delimiter = ',')]
        device_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    watchme_common::logging::init(&config.logging).context("Failed to initialize logging")?;

    info!("Starting watchme-pipeline v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Command::WeeklyProfile { device_ids } => weekly_profile(config, device_ids).await,
    }
}

async fn serve(config: TomlConfig) -> Result<()> {
    let store = status_store(&config)?;
    let pipeline = Pipeline::from_config(&config, store).context("Failed to assemble pipeline")?;

    let pool = ConsumerPool::spawn(
        pipeline.consumers,
        config.queue.consumers_per_queue,
        CancellationToken::new(),
    );

    let app = build_router(pipeline.state);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn weekly_profile(config: TomlConfig, device_ids: Vec<String>) -> Result<()> {
    let device_ids = if device_ids.is_empty() {
        config.weekly.device_ids.clone()
    } else {
        device_ids
    };
    if device_ids.is_empty() {
        anyhow::bail!("No devices configured for the weekly profile job ([weekly] device_ids)");
    }

    let api = PipelineApi::new(UpstreamClient::from_config(&config)?, config.api.clone());
    let job = WeeklyProfileJob::new(api, device_ids);
    let report = job.run(watchme_common::time::now().date_naive()).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failure_count > 0 {
        warn!(failed = report.failure_count, "Weekly profile finished with failures");
    }
    Ok(())
}

/// REST store when configured, in-memory store otherwise
fn status_store(config: &TomlConfig) -> Result<Arc<dyn StatusStore>> {
    if config.store.url.is_some() {
        let store = RestStatusStore::from_config(&config.store, &config.timeouts)?;
        info!("Using REST status store");
        Ok(Arc::new(store))
    } else {
        warn!("store.url not configured, using in-memory status store");
        Ok(Arc::new(InMemoryStatusStore::default()))
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
