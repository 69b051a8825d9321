//! Intake API
//!
//! Local HTTP server the framework runners report to.

pub mod broker;
pub mod error;
pub mod health;
pub mod results;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use broker::ResultBroker;

/// Create the intake router
pub fn create_router(broker: Arc<ResultBroker>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/test-list/{request_id}", post(results::post_test_list))
        .route("/results/{request_id}", post(results::post_results))
        .with_state(broker)
        .layer(TraceLayer::new_for_http())
}

/// Serves `router` until `shutdown` is cancelled
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    tracing::info!("Intake server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Intake server error")
}
