//! Axum-based HTTP servers.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::{GatewayState, RelayState};
use crate::{broadcast, relay};

/// Routes of the broadcast server.
pub fn broadcast_router(state: Arc<GatewayState>) -> Router {
    let router = Router::new()
        .route("/api/tldraw-events", get(broadcast::events_handler))
        .route("/api/snapshot", post(broadcast::snapshot_handler))
        .route("/api/tools", get(tools_handler))
        .route("/api/tools/{name}", post(call_tool_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    with_metrics(router)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Routes of the relay proxy.
pub fn relay_router(state: Arc<RelayState>) -> Router {
    let router = Router::new()
        .route("/api/events", get(relay::events_handler))
        .route("/api/snapshot", post(relay::snapshot_handler))
        .with_state(state);

    with_metrics(router).layer(TraceLayer::new_for_http())
}

#[cfg(feature = "metrics")]
fn with_metrics(router: Router) -> Router {
    match crate::metrics::prometheus_handle() {
        Some(handle) => router.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        ),
        None => router,
    }
}

#[cfg(not(feature = "metrics"))]
fn with_metrics(router: Router) -> Router {
    router
}

/// Start the broadcast server on `addr` and run until Ctrl-C.
pub async fn start_broadcast_server(state: Arc<GatewayState>, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        heartbeat_ms = state.config.heartbeat_interval().as_millis() as u64,
        "Broadcast server listening on {addr}"
    );

    let streams = state.shutdown.clone();
    axum::serve(listener, broadcast_router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            streams.cancel();
        })
        .await?;

    Ok(())
}

/// Start the relay proxy on `addr` and run until Ctrl-C.
pub async fn start_relay_proxy(state: Arc<RelayState>, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(upstream = %state.upstream_url, "Relay proxy listening on {addr}");

    let streams = state.shutdown.clone();
    axum::serve(listener, relay_router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            streams.cancel();
        })
        .await?;

    Ok(())
}

async fn tools_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({ "tools": state.dispatcher.definitions() }))
}

async fn call_tool_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    if !state.dispatcher.has_tool(&name) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Unknown tool: {name}") })),
        );
    }

    let args = if body.iter().all(u8::is_ascii_whitespace) {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(args) => args,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Invalid JSON arguments: {e}") })),
                );
            }
        }
    };

    match state.dispatcher.dispatch(&name, args).await {
        Ok(output) => (StatusCode::OK, Json(json!(output))),
        Err(e) => {
            warn!(tool = %name, error = %e, "Tool call failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "status": "ok",
        "version": version,
        "subscribers": state.connection_count(),
        "connections": state.connection_list(),
        "pendingSnapshots": state.snapshots.pending_count(),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl-C handler; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
