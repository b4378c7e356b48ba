//! Liveness endpoints.

use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn serve(port: u16, cancel: CancellationToken) {
    let app = Router::new()
        .route("/health", get(status))
        .route("/ready", get(status));

    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind health endpoints");
            return;
        }
    };
    info!(addr = %addr, "Health endpoints listening");

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await });
    if let Err(e) = server.await {
        error!(error = %e, "Health server error");
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
