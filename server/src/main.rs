//! Gatekeeper Server - Main Entry Point
//!
//! HTTP server with distributed admission control.

use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;

use gk_server::{api, config, ratelimit::AdmissionGate, store::TopologySelector};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gk_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Gatekeeper Server"
    );

    // Initialize the shared store client (connects in the background).
    // Store commands never outlive the admission timeout.
    let selector = TopologySelector::with_command_timeout(
        config.store.clone(),
        config.rate_limit.store_timeout,
    );
    let topology = selector.topology_kind().await;
    info!(topology, "Admission counter store selected");

    // Initialize admission gate (optional)
    let gate = if config.rate_limit.enabled {
        let gate = AdmissionGate::new(&selector, config.rate_limit.clone()).await;
        gate.local().spawn_sweeper(config.rate_limit.sweep_interval);
        info!(
            backend = gate.backend_name(),
            max_requests = config.rate_limit.limit.requests,
            window_secs = config.rate_limit.limit.window.as_secs(),
            "Admission gate initialized"
        );
        Some(gate)
    } else {
        info!("Rate limiting disabled by configuration");
        None
    };

    // Build application state
    let state = api::AppState::new(config.clone(), selector.clone(), gate);

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    selector.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}
