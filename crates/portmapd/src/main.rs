//! Port Mapping Daemon Entry Point

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use portmap_common::CancellationToken;
use portmapd::config::{ConfigSource, LoggingConfig, DEFAULT_CONFIG_PATH};
use portmapd::{api, PortMappingMgr, PortMappingService, PortmapConfig};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Host port mapping daemon
#[derive(Parser, Debug)]
#[command(name = "portmapd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listen address, overrides server.listen_addr
    #[arg(short = 'l', long)]
    listen: Option<String>,
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (mut config, source) = PortmapConfig::load_with_source(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    init_logging(&config.logging);
    info!("Starting portmapd");
    match source {
        ConfigSource::File => info!(path = %args.config.display(), "Loaded configuration"),
        ConfigSource::Defaults => {
            warn!(path = %args.config.display(), "Config file not found, using defaults")
        }
    }

    config.validate().context("validating configuration")?;

    let mgr = PortMappingMgr::from_config(&config.mapping)
        .context("creating port mapping manager")?;

    let shutdown = CancellationToken::new();

    // nft may come up after us; the daemon still serves requests
    match mgr.test_connection(&shutdown).await {
        Ok(version) => info!(version = %version, "nft probe succeeded"),
        Err(e) => warn!(error = %e, "nft probe failed, continuing"),
    }

    let service = PortMappingService::new(mgr);
    let app = api::build_router(service);

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(addr = %addr, "portmapd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("running control server")?;

    info!("portmapd stopped");
    Ok(())
}
