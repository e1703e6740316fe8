//! Read-only HTTP status surface.
//!
//! - `GET /health`: liveness and version
//! - `GET /status`: the supervisor's [`SupervisorStatus`]
//!
//! The server binds to localhost only and never mutates daemon state.

use crate::supervisor::{Supervisor, SupervisorStatus};
use axum::{extract::State, http::HeaderValue, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub running: bool,
}

/// GET /health
async fn health(State(supervisor): State<Arc<Supervisor>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running: supervisor.is_running(),
    })
}

/// GET /status
async fn status(State(supervisor): State<Arc<Supervisor>>) -> Json<SupervisorStatus> {
    Json(supervisor.status())
}

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(supervisor)
}

/// Serve on `127.0.0.1:port` (0 picks a free port).
///
/// Returns the bound address and a sender that shuts the server down.
pub async fn run(
    port: u16,
    supervisor: Arc<Supervisor>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(supervisor);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!(addr = %actual_addr, "status server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("status server shutting down");
            })
            .await
        {
            tracing::error!(error = %e, "status server error");
        }
    });

    Ok((actual_addr, shutdown_tx))
}
