/// Read API: chart aggregation and collector health over HTTP
pub mod error;
pub mod routes;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::collector::CollectorRegistry;
use crate::data::{ChartAggregator, SampleStore};
use crate::error::{FeedError, Result};

#[derive(Clone)]
pub struct ApiState {
    pub aggregator: ChartAggregator,
    pub registry: Arc<CollectorRegistry>,
    pub store: SampleStore,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/getChartData/:token_symbol", get(routes::get_chart_data))
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until Ctrl+C
pub async fn serve(bind_address: &str, state: ApiState) -> Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(|e| FeedError::Server(format!("Failed to bind {}: {}", bind_address, e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| FeedError::Server(format!("No local address on {}: {}", bind_address, e)))?;
    info!("🌐 API listening on http://{}", local);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| FeedError::Server(format!("Serving on {} failed: {}", local, e)))?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received - initiating graceful shutdown");
}
