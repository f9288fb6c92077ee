use axum::routing::get;
use axum::Router;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const QUERIES_TOTAL: &str = "pgrelay_queries_total";
pub const QUERY_ERRORS_TOTAL: &str = "pgrelay_query_errors_total";
pub const PROTOCOL_ERRORS_TOTAL: &str = "pgrelay_protocol_errors_total";
pub const CONNECTIONS_ACTIVE: &str = "pgrelay_connections_active";

fn describe() {
    describe_counter!(QUERIES_TOTAL, "Queries answered with rows");
    describe_counter!(QUERY_ERRORS_TOTAL, "Queries answered with an error");
    describe_counter!(PROTOCOL_ERRORS_TOTAL, "Connections closed on a bad or stalled frame");
    describe_gauge!(CONNECTIONS_ACTIVE, "Client connections currently open");
}

pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .route("/health", get(|| async { "ok" }))
}

/// Installs the global Prometheus recorder and serves it over HTTP.
pub async fn start_exporter(listen_addr: &str) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    serve(listen_addr, handle).await
}

pub async fn serve(
    listen_addr: &str,
    handle: PrometheusHandle,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(listen_addr).await?;
    let local_addr = listener.local_addr()?;
    info!("metrics listening on {local_addr}");
    let app = router(handle);
    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!("metrics server error: {err}");
        }
    });
    Ok((local_addr, task))
}
