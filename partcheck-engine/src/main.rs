//! partcheck-engine - part matching service
//!
//! Serves closed-world matching passes and cache administration over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use partcheck_engine::cache::{HttpRemoteRepository, HybridCache, RemoteRepository, SqliteLocalStore};
use partcheck_engine::catalog::SqliteCatalog;
use partcheck_engine::config::{EngineConfig, CONFIG_ENV, MODULE_NAME, ROOT_FOLDER_ENV};
use partcheck_engine::{AppState, MatchingService};

/// Command-line arguments for partcheck-engine
#[derive(Parser, Debug)]
#[command(name = "partcheck-engine")]
#[command(about = "Closed-world part matching service")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "PARTCHECK_PORT")]
    port: Option<u16>,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Sync the cache with the remote repository at startup
    #[arg(long)]
    sync_on_start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path =
        partcheck_common::config::resolve_config_path(args.config.as_deref(), CONFIG_ENV, MODULE_NAME);
    let mut config = EngineConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }

    partcheck_common::logging::init_tracing(&config.logging)
        .context("Failed to initialize logging")?;

    info!("Starting {} v{}", MODULE_NAME, env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    let root_folder = partcheck_common::config::resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    );
    let db_path = config.database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let pool = partcheck_engine::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let remote: Option<Arc<dyn RemoteRepository>> = match &config.cache.remote_url {
        Some(url) => {
            let client = HttpRemoteRepository::new(
                url.clone(),
                Duration::from_secs(config.cache.remote_timeout_secs),
            )
            .context("Failed to create remote client")?;
            info!("Remote repository: {}", client.base_url());
            Some(Arc::new(client))
        }
        None => {
            warn!("No remote repository configured; cache misses will not be filled");
            None
        }
    };

    let cache = Arc::new(HybridCache::new(
        config.cache.clone(),
        Arc::new(SqliteLocalStore::new(pool.clone())),
        remote,
    ));
    let service = Arc::new(MatchingService::new(
        config.matching,
        Arc::new(SqliteCatalog::new(pool)),
        cache,
    ));

    let state = AppState::new(service);
    let shutdown = state.shutdown.clone();

    if args.sync_on_start {
        let startup = state.clone();
        tokio::spawn(async move {
            match startup.sync_exclusive().await {
                Ok(report) => info!(
                    to = %report.to_version,
                    downloads = report.downloads,
                    "Startup sync finished"
                ),
                Err(e) => warn!(error = %e, "Startup sync failed, continuing with stale cache"),
            }
        });
    }

    let app = partcheck_engine::build_router(state);

    let ip = config
        .bind_address
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("Invalid bind address '{}'", config.bind_address))?;
    let addr = SocketAddr::new(ip, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel in-flight work
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
