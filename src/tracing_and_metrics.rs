//! Shared observability bootstrap: tracing subscriber plus the Prometheus
//! scrape endpoint every binary exposes.

use autometrics::prometheus_exporter;
use axum::routing::get;
use axum::Router;
use tracing::error;
use tracing_subscriber::EnvFilter;

pub fn setup_tracing() {
    prometheus_exporter::init();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn metrics() -> String {
    prometheus_exporter::encode_to_string().unwrap_or_default()
}

/// Serves `/metrics` on the given port until the process exits. Spawned as a
/// background task from each binary's main.
pub async fn run_metrics_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics));
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(err.msg = %e, "Failed to bind metrics server on port {port}");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(err.msg = %e, "Metrics server stopped");
    }
}
