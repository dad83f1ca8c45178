use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use gatehouse::middleware::StaticCredentialResolver;
use gatehouse::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Configuration is loaded first so logging can honor RUST_LOG / LOG_FORMAT
    let config = Config::from_env();
    match &config {
        Ok(c) => utils::init_tracing(&c.log_level, c.log_json),
        Err(_) => utils::init_tracing("info", false),
    }

    info!("Starting Gatehouse v{}", env!("CARGO_PKG_VERSION"));

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

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        rate_limiting = config.rate_limiting_enabled(),
        window_secs = config.rate_limit_window.as_secs(),
        max_requests = config.rate_limit_max_requests,
        trusted_proxies = config.trusted_proxies.len(),
        "Configuration loaded"
    );
    if !config.proxy_validation_enabled() {
        warn!("TRUSTED_PROXIES is empty; forwarding headers are trusted from any peer");
    }

    if let Some(addr) = config.metrics_addr() {
        metrics::init_metrics(addr).map_err(|e| {
            error!("Failed to start metrics exporter: {e}");
            exitcode::UNAVAILABLE
        })?;
        info!("Prometheus metrics available on http://{addr}/metrics");
    }

    // Build application state (starts the eviction task) and router
    let resolver = Arc::new(StaticCredentialResolver::with_demo_users());
    let state = AppState::new(config.clone(), resolver).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone());

    // Start server
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
    info!("  GET    /health          - Health check");
    info!("  GET    /ready           - Readiness check");
    info!("  GET    /stats           - Rate limiter statistics");
    info!("  POST   /user/login      - Obtain a bearer token");
    info!("  GET    /user/info/{{id}}  - User profile");
    info!("  PUT    /user/{{id}}       - Update user (auth, rate limited)");
    info!("  DELETE /user/{{id}}       - Delete user (auth, rate limited)");

    // Peer addresses are needed for client identity resolution
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

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
