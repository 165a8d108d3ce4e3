//! Relay proxy: re-publishes the upstream operation stream on
//! `/api/events` and forwards snapshot posts to the upstream server.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header::ACCEPT},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use tldraw_relay_core::error::{RelayError, Result};
use tldraw_relay_core::frame::EVENT_HEARTBEAT;
use tldraw_relay_core::operation::SnapshotResponsePayload;
use tldraw_relay_core::{Frame, FrameDecoder};

use crate::broadcast::{SNAPSHOT_FAILED, event_stream_response};
use crate::state::RelayState;

pub const INITIALIZED_MESSAGE: &str = "API route initialized";
pub const UPSTREAM_FAILED: &str = "Failed to connect to tldraw server";

/// Frames queued between the upstream reader and the downstream body.
const RELAY_CHANNEL_CAPACITY: usize = 64;

/// Why the upstream pump stopped without an error.
#[derive(Debug, PartialEq, Eq)]
enum PumpEnd {
    UpstreamClosed,
    DownstreamClosed,
    Shutdown,
}

/// Turn one upstream frame into what the downstream client receives.
///
/// Heartbeats become `{"message": <data>}`; every other event must carry JSON
/// and is re-serialised. Frames without data, and frames whose data is not
/// JSON, are dropped.
pub fn reframe(frame: Frame) -> Option<Frame> {
    if frame.data.is_empty() {
        return None;
    }
    if frame.event == EVENT_HEARTBEAT {
        return Some(Frame::new(
            EVENT_HEARTBEAT,
            json!({ "message": frame.data }).to_string(),
        ));
    }
    match serde_json::from_str::<Value>(&frame.data) {
        Ok(value) => Some(Frame::new(frame.event, value.to_string())),
        Err(e) => {
            warn!(event = %frame.event, error = %e, "Dropping frame with unparsable data");
            None
        }
    }
}

/// Spawn the relay task for one downstream client and return its frames.
pub fn relay_stream(state: Arc<RelayState>) -> ReceiverStream<Frame> {
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    tokio::spawn(run_relay(state, tx));
    ReceiverStream::new(rx)
}

async fn run_relay(state: Arc<RelayState>, tx: mpsc::Sender<Frame>) {
    let hello = Frame::debug(INITIALIZED_MESSAGE, &Utc::now().to_rfc3339());
    if tx.send(hello).await.is_err() {
        return;
    }

    match pump(&state, &tx).await {
        Ok(PumpEnd::UpstreamClosed) => info!(upstream = %state.upstream_url, "Upstream stream ended"),
        Ok(PumpEnd::DownstreamClosed) => debug!("Relay client disconnected"),
        Ok(PumpEnd::Shutdown) => debug!("Relay stream closed for shutdown"),
        Err(e) => {
            warn!(upstream = %state.upstream_url, error = %e, "Relay upstream failed");
            let _ = tx.send(Frame::error(UPSTREAM_FAILED)).await;
        }
    }
}

async fn pump(state: &RelayState, tx: &mpsc::Sender<Frame>) -> Result<PumpEnd> {
    let request = state
        .client
        .get(&state.upstream_url)
        .header(ACCEPT, "text/event-stream")
        .send();
    // An upstream that accepts but never answers must not outlive the client.
    let response = tokio::select! {
        _ = state.shutdown.cancelled() => return Ok(PumpEnd::Shutdown),
        _ = tx.closed() => return Ok(PumpEnd::DownstreamClosed),
        response = request => response.map_err(|e| RelayError::Upstream(e.to_string()))?,
    };

    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::Upstream(format!("upstream returned {status}")));
    }
    info!(upstream = %state.upstream_url, "Relay attached to upstream");

    let mut body = std::pin::pin!(response.bytes_stream());
    let mut decoder = FrameDecoder::new();
    loop {
        let chunk = tokio::select! {
            _ = state.shutdown.cancelled() => return Ok(PumpEnd::Shutdown),
            _ = tx.closed() => return Ok(PumpEnd::DownstreamClosed),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| RelayError::Upstream(e.to_string()))?;

        for frame in decoder.push(&chunk) {
            let Some(frame) = reframe(frame) else {
                #[cfg(feature = "metrics")]
                crate::metrics::record_relay_frame_dropped();
                continue;
            };
            if tx.send(frame).await.is_err() {
                return Ok(PumpEnd::DownstreamClosed);
            }
        }
    }

    let discarded = decoder.finish();
    if discarded > 0 {
        debug!(bytes = discarded, "Discarded unterminated trailing frame");
    }
    Ok(PumpEnd::UpstreamClosed)
}

pub async fn events_handler(State(state): State<Arc<RelayState>>) -> Response {
    let body = relay_stream(state).map(|frame| Ok::<_, Infallible>(Bytes::from(frame.encode())));
    event_stream_response(Body::from_stream(body), "no-cache, no-transform")
}

/// Forward a surface's snapshot answer to the upstream server.
pub async fn snapshot_handler(
    State(state): State<Arc<RelayState>>,
    body: Bytes,
) -> impl IntoResponse {
    let payload = match serde_json::from_slice::<SnapshotResponsePayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Malformed snapshot post");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": SNAPSHOT_FAILED })),
            );
        }
    };

    let forwarded = state
        .client
        .post(&state.snapshot_url)
        .json(&payload)
        .send()
        .await
        .and_then(|resp| resp.error_for_status());
    match forwarded {
        Ok(_) => {
            debug!(request_id = %payload.request_id, "Snapshot forwarded");
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        Err(e) => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_snapshot_request("forward_failed");
            warn!(upstream = %state.snapshot_url, error = %e, "Failed to forward snapshot");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "error": SNAPSHOT_FAILED })),
            )
        }
    }
}
