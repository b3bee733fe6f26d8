//! sitecheck-pipeline - construction document analysis service
//!
//! Accepts batches of building models, bills of quantities and project
//! documents over HTTP, runs them through the staged pipeline and serves
//! job status, results and exports. Progress is streamed over SSE.

use anyhow::{Context, Result};
use clap::Parser;
use sitecheck_common::config::{load_or_default, write_toml_config, TomlConfig};
use sitecheck_pipeline::config::PipelineSettings;
use sitecheck_pipeline::context::ServiceContext;
use sitecheck_pipeline::AppState;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SITECHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address, overrides the config file and SITECHECK_BIND
    #[arg(short, long)]
    bind: Option<String>,

    /// Write a config file with compiled defaults to this path and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        write_toml_config(&TomlConfig::default(), path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Default configuration written to {}", path.display());
        return Ok(());
    }

    let toml = load_or_default(args.config.as_deref());
    let mut settings = PipelineSettings::resolve(&toml);
    if let Some(bind) = args.bind {
        settings.bind_address = bind;
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sitecheck-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Data folder: {}", settings.data_dir.display());

    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("Failed to create {}", settings.data_dir.display()))?;

    let bind_address = settings.bind_address.clone();
    let context = ServiceContext::build(settings)
        .await
        .context("Failed to initialize services")?;
    let shutdown = context.shutdown.clone();

    let app = sitecheck_pipeline::build_router(AppState::new(&context));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels running jobs
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }

    shutdown.cancel();
}
