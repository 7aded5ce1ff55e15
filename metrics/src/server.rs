use crate::Metrics;
use anyhow::{Error as AnyhowError, Result};
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct MetricsServerConfig {
    pub metrics_address: IpAddr,
    pub metrics_port: u16,
}

impl From<&MetricsServerConfig> for SocketAddr {
    fn from(config: &MetricsServerConfig) -> Self {
        SocketAddr::from((config.metrics_address, config.metrics_port))
    }
}

/// Read-only node snapshot served on `/status`.
pub trait StatusProvider: Send + Sync {
    fn status(&self) -> serde_json::Value;
}

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    status: Arc<dyn StatusProvider>,
}

async fn prometheus_metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.gather().map_err(|err| {
        warn!(error = %err, "failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn status_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.status.status())
}

pub fn router(metrics: Arc<Metrics>, status: Arc<dyn StatusProvider>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics_handler))
        .route("/status", get(status_handler))
        .with_state(AppState { metrics, status })
}

pub async fn run_metrics_server(
    config: MetricsServerConfig,
    metrics: Arc<Metrics>,
    status: Arc<dyn StatusProvider>,
) -> Result<()> {
    let addr = SocketAddr::from(&config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "metrics server listening");

    axum::serve(listener, router(metrics, status).into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(AnyhowError::new)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    struct FixedStatus;

    impl StatusProvider for FixedStatus {
        fn status(&self) -> serde_json::Value {
            serde_json::json!({ "height": 7, "syncing": false })
        }
    }

    #[test]
    fn test_socket_addr_from_config() {
        let config = MetricsServerConfig {
            metrics_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            metrics_port: 9100,
        };
        assert_eq!(SocketAddr::from(&config).to_string(), "127.0.0.1:9100");
    }

    #[tokio::test]
    async fn test_status_handler_returns_provider_json() {
        let state = AppState {
            metrics: Arc::new(Metrics::new()),
            status: Arc::new(FixedStatus),
        };
        let Json(body) = status_handler(State(state)).await;
        assert_eq!(body, serde_json::json!({ "height": 7, "syncing": false }));
    }

    #[tokio::test]
    async fn test_metrics_handler_encodes_registry() {
        let metrics = Arc::new(Metrics::new());
        metrics.set_peers_connected(3);
        let state = AppState {
            metrics,
            status: Arc::new(FixedStatus),
        };
        let body = prometheus_metrics_handler(State(state)).await.unwrap();
        assert!(body.contains("network_peers_connected 3"));
    }
}
