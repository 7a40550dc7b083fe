//! machi-report - Municipality report service
//!
//! Scores and ranks Japanese municipalities from e-Stat statistics and
//! real-estate transaction prices, and serves the reports over HTTP.
//!
//! **Startup order:**
//! 1. Load configuration (CLI → ENV → TOML → defaults)
//! 2. Initialize tracing
//! 3. Validate the compiled-in dataset catalog (fatal on error)
//! 4. Build clients, shared caches and the pipeline
//! 5. Serve until Ctrl+C / SIGTERM, cancelling in-flight runs on shutdown

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use machi_common::config::{self, TomlConfig};
use machi_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use machi_report::services::{
    CacheTtls, DatasetCatalog, LocationIndex, PriceCache, ReadingRegistry, RealEstateClient,
    ReportPipeline, ReqwestTransport, ResponseCache, StatsCache, StatsClient,
};
use machi_report::utils::RetryPolicy;
use machi_report::AppState;

const MODULE_NAME: &str = "machi-report";
const EVENT_BUS_CAPACITY: usize = 100;
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// Command-line arguments for machi-report
#[derive(Parser, Debug)]
#[command(name = "machi-report")]
#[command(about = "Municipality statistics scoring and report service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides [server] port)
    #[arg(short, long, env = "MACHI_REPORT_PORT")]
    port: Option<u16>,

    /// Path to the TOML config file
    #[arg(short, long, env = config::CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = config::load_config(args.config.as_deref(), MODULE_NAME)
        .context("Failed to load configuration")?;

    init_tracing(&toml_config)?;

    info!("Starting machi-report v{}", env!("CARGO_PKG_VERSION"));
    match config::resolve_config_path(args.config.as_deref(), MODULE_NAME) {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("Config file: none (built-in defaults)"),
    }

    // Bad static data must stop the process before the listener is bound
    let catalog = Arc::new(DatasetCatalog::builtin().context("Dataset catalog is invalid")?);
    info!(
        datasets = catalog.datasets().count(),
        indicators = catalog.indicators().len(),
        "Dataset catalog validated"
    );

    let registry = Arc::new(ReadingRegistry::builtin().clone());
    let locations = Arc::new(LocationIndex::builtin().clone());
    info!(municipalities = registry.len(), "Reading registry loaded");

    let transport = Arc::new(
        ReqwestTransport::new(toml_config.pipeline.upstream_deadline())
            .context("Failed to build HTTP client")?,
    );
    let retry = RetryPolicy::from_config(&toml_config.pipeline);
    let ttls = CacheTtls::from_config(&toml_config.cache);

    let stats_cache: Arc<StatsCache> = Arc::new(ResponseCache::new("estat"));
    let price_cache: Arc<PriceCache> = Arc::new(ResponseCache::new("real_estate"));

    let stats_client = StatsClient::new(
        &toml_config.estat,
        retry,
        ttls,
        transport.clone(),
        Arc::clone(&catalog),
        Arc::clone(&stats_cache),
    )
    .context("Invalid e-Stat configuration")?;

    let real_estate_client = RealEstateClient::new(
        &toml_config.real_estate,
        retry,
        ttls,
        transport,
        Arc::clone(&catalog),
        Arc::clone(&price_cache),
    )
    .context("Invalid real-estate configuration")?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    let pipeline = Arc::new(ReportPipeline::new(
        registry,
        catalog,
        stats_client,
        real_estate_client,
        event_bus.clone(),
        &toml_config.pipeline,
    ));

    let state = AppState::new(pipeline, locations, event_bus);
    let shutdown = state.shutdown.clone();

    spawn_cache_purge(stats_cache, price_cache, shutdown.clone());

    let app = machi_report::build_router(state);

    let port = args.port.unwrap_or(toml_config.server.port);
    let addr = format!("{}:{}", toml_config.server.host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(toml_config: &TomlConfig) -> Result<()> {
    let level = &toml_config.logging.level;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("machi_report={level},machi_common={level},tower_http=info").into()
    });

    let file_layer = match &toml_config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Periodically evict expired cache entries until shutdown
fn spawn_cache_purge(
    stats_cache: Arc<StatsCache>,
    price_cache: Arc<PriceCache>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let purged = stats_cache.purge_expired() + price_cache.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "Cache purge completed");
                    }
                }
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
