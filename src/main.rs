use std::sync::Arc;

use tracing::info;

use fleetd::engine::{AllocatorConfig, Engine, LeaseConfig};
use fleetd::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("FLEETD_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    fleetd::observability::init(metrics_port);

    let port = std::env::var("FLEETD_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("FLEETD_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let min_gap_secs: i64 = std::env::var("FLEETD_LEASE_MIN_GAP_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(120);
    let renew_interval_secs: u64 = std::env::var("FLEETD_LEASE_RENEW_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(90);
    let retry_next_candidate: bool = std::env::var("FLEETD_RETRY_NEXT_CANDIDATE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(false);

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(Engine::new(
        store,
        LeaseConfig {
            min_gap_secs,
            renew_interval_secs,
        },
        AllocatorConfig {
            retry_next_candidate,
        },
    ));
    engine.bootstrap().await?;

    let app = fleetd::service::router(engine);
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("fleetd listening on {addr}");
    info!("  lease: min gap {min_gap_secs}s, renew every {renew_interval_secs}s");
    info!("  retry next candidate: {retry_next_candidate}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("fleetd stopped");
    Ok(())
}

/// Stop accepting on SIGTERM/ctrl-c; axum drains in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
