//! Observability for parley: logging and metrics.

use crate::config::ObservabilityConfig;
use crate::error::{ParleyError, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging. `RUST_LOG` overrides the configured level.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ParleyError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ParleyError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics endpoint.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| ParleyError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ParleyError::Network(e.to_string()))?;

    Ok(())
}

fn register_metrics() {
    gauge!("parley_raft_term").set(0.0);
    gauge!("parley_raft_commit_index").set(0.0);
    counter!("parley_raft_elections_total").absolute(0);
    counter!("parley_raft_proposals_total").absolute(0);
}

/// Update Raft gauges.
pub fn update_raft_metrics(term: u64, commit_index: u64) {
    gauge!("parley_raft_term").set(term as f64);
    gauge!("parley_raft_commit_index").set(commit_index as f64);
}

/// Count one election attempt.
pub fn record_election() {
    counter!("parley_raft_elections_total").increment(1);
}

/// Count one client proposal.
pub fn record_proposal() {
    counter!("parley_raft_proposals_total").increment(1);
}
