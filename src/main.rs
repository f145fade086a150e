use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use storefront_edge::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Tracing settings come from the environment, so they must be read first
    let config = Config::from_env();
    match &config {
        Ok(c) => init_tracing(&c.log_level, c.log_json),
        Err(_) => init_tracing("info", false),
    }

    info!("Starting storefront edge v{}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Human-readable output by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        rate_limit = config.rate_limit_requests,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        cache_namespace = %config.cache_namespace,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let state = AppState::from_config(config.clone()).map_err(|e| {
        error!("Failed to initialize store client: {e}");
        exitcode::CONFIG
    })?;

    // Not fatal: the limiter fails closed and /ready reports the outage
    match state.cache.ping().await {
        Ok(()) => info!("Store reachable"),
        Err(e) => error!("Store unreachable at startup, limited routes will answer 500: {e}"),
    }

    let app = build_router(state).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health             - Liveness");
    info!("  GET  /ready              - Readiness (store ping)");
    info!("  GET  /stats              - Service statistics (cached)");
    info!("  GET  /me                 - Current user (auth required)");
    info!("  GET  /session            - Session info (auth optional)");
    info!("  POST /admin/cache/purge  - Purge response cache (admin)");

    // Peer addresses feed client IP resolution when no trusted proxy header applies
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("Server shutdown complete");
    Ok(())
}
