// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Stream gateway entrypoint — loads configuration, starts the Probe and
//! Sweep loops, and serves the HTTP surface until CTRL+C.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nearhome_stream_gateway::api::{self, AppState};
use nearhome_stream_gateway::config::Config;
use nearhome_stream_gateway::metrics::Metrics;
use nearhome_stream_gateway::probe::{self, RandomPlaceboProber};
use nearhome_stream_gateway::registry::Registry;
use nearhome_stream_gateway::session::{self, SessionManager};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        port = config.port,
        storage_dir = ?config.storage_dir,
        probe_interval_ms = config.probe_interval.as_millis() as u64,
        session_idle_ttl_ms = config.session_idle_ttl.as_millis() as u64,
        "Starting stream gateway"
    );

    let registry = Arc::new(Registry::new());
    let sessions = Arc::new(SessionManager::new());
    let metrics = Arc::new(Metrics::new());

    let probe_handle = probe::spawn(registry.clone(), Arc::new(RandomPlaceboProber), config.probe_interval);
    let sweep_handle = session::spawn(
        sessions.clone(),
        metrics.clone(),
        config.session_sweep_interval,
        config.session_idle_ttl,
    );

    let port = config.port;
    let state = Arc::new(AppState {
        registry,
        sessions,
        metrics,
        config,
    });

    let server = tokio::spawn(async move {
        api::start_server(state, port).await;
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, shutting down…"),
        Err(e) => error!(error = %e, "Signal error"),
    }

    probe_handle.abort();
    sweep_handle.abort();
    server.abort();
}
