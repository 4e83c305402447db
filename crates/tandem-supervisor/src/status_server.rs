//! HTTP status endpoint for the supervisor itself.
//!
//! `GET /health` and `GET /` return the status snapshot as JSON; `GET /ready`
//! answers whether startup completed. Non-serving states answer 503 so an
//! orchestrator probe can act on the status code alone.

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tandem_monitoring::{StatusSnapshot, StatusTracker, SupervisorStatus};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Creates the status router.
pub fn create_router(tracker: StatusTracker) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(tracker)
}

async fn health_handler(
    State(tracker): State<StatusTracker>,
) -> (StatusCode, Json<StatusSnapshot>) {
    let snapshot = tracker.snapshot();
    let code = if snapshot.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot))
}

async fn ready_handler(State(tracker): State<StatusTracker>) -> (StatusCode, Json<Value>) {
    if tracker.status() == SupervisorStatus::Healthy {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready" })),
        )
    }
}

/// Bind `0.0.0.0:{port}` and serve until `shutdown` fires.
pub async fn serve(port: u16, tracker: StatusTracker, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind status server to {}", addr))?;

    serve_listener(listener, tracker, shutdown).await
}

/// Serve on an already bound listener until `shutdown` fires.
pub async fn serve_listener(
    listener: TcpListener,
    tracker: StatusTracker,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Status server listening on {}", addr);
    }

    axum::serve(listener, create_router(tracker))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Status server failed")?;

    info!("Status server stopped");
    Ok(())
}
