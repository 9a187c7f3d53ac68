//! Axum server setup and router configuration.

use crate::api;
use crate::shutdown::wait_for_shutdown;
use crate::state::AppState;
use axum::{
    Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get,
};
use purgeq_sdk::objects::QueueStatsResponse;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(api::router())
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<QueueStatsResponse>,
}

/// Liveness plus queue depth. Answers 503 when the queue cannot be read.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                version: env!("CARGO_PKG_VERSION"),
                queue: Some(stats.into()),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read queue stats");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "queue unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                    queue: None,
                }),
            )
        }
    }
}

/// Run the server until `shutdown_rx` turns `true`.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);
    serve(listener, router, shutdown_rx).await
}

/// Serve `router` on an already bound listener with graceful shutdown.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use purgeq_core::config::{ConfigStore, QueueConfig, WebhookSettings};
    use purgeq_core::path::PathNormalizer;
    use purgeq_core::queue::MemoryQueue;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_queue_depth() {
        let state = AppState::new(
            Arc::new(MemoryQueue::new(QueueConfig::default())),
            ConfigStore::new(WebhookSettings {
                api_key: "k".to_string(),
                normalizer: PathNormalizer::default(),
            }),
        );
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["queue"]["visible"], 0);
    }
}
