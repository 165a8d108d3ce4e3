//! Event-stream fan-out of published operations.
//!
//! Provides `/api/tldraw-events` for rendering surfaces and `/api/snapshot`
//! for their snapshot answers.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{
        HeaderName, StatusCode,
        header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{Stream, StreamExt, future, stream};
use serde_json::{Value, json};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tldraw_relay_core::operation::SnapshotResponsePayload;
use tldraw_relay_core::{Frame, Operation, Subscription};

use crate::state::{GatewayState, StreamConnection};

pub const CONNECTED_MESSAGE: &str = "Connected to TldrawServer";
pub const SNAPSHOT_FAILED: &str = "Failed to process snapshot";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Wrap an encoded frame stream in the headers every event-stream response carries.
pub(crate) fn event_stream_response(body: Body, cache_control: &'static str) -> Response {
    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, cache_control),
            (CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        body,
    )
        .into_response()
}

/// Tears down one connection: leaves the registry, then the bus subscription
/// is released as the field drops.
struct ConnectionGuard {
    state: Arc<GatewayState>,
    conn_id: String,
    _subscription: Subscription,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.connections().remove(&self.conn_id);
        #[cfg(feature = "metrics")]
        crate::metrics::record_stream_disconnect();
        info!(conn_id = %self.conn_id, "Stream client disconnected");
    }
}

struct ConnectionStream {
    frames: mpsc::Receiver<Frame>,
    heartbeat: Interval,
    shutdown: CancellationToken,
    _guard: ConnectionGuard,
}

/// The frame sequence for one new connection: a `connected` frame, then
/// operations as they are published, interleaved with heartbeats.
///
/// Dropping the stream unsubscribes it. A connection whose queue fills up is
/// cut loose: it drains what was already queued and then ends.
pub fn operation_stream(state: Arc<GatewayState>) -> impl Stream<Item = Frame> + Send + 'static {
    let conn_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(state.config.send_queue_capacity().max(1));

    let sender = Mutex::new(Some(tx));
    let lag_conn_id = conn_id.clone();
    let subscription = state.bus.subscribe_guarded(move |op| {
        let mut sender = sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return;
        };
        let frame = match Frame::operation(op) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn_id = %lag_conn_id, error = %e, "Failed to encode operation");
                return;
            }
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %lag_conn_id, kind = %op.kind, "Stream client lagging, disconnecting");
                sender.take();
            }
            Err(TrySendError::Closed(_)) => {
                sender.take();
            }
        }
    });

    state.connections().insert(
        conn_id.clone(),
        StreamConnection {
            conn_id: conn_id.clone(),
            connected_at: Utc::now(),
        },
    );
    #[cfg(feature = "metrics")]
    crate::metrics::record_stream_connect();
    info!(conn_id = %conn_id, subscribers = state.connection_count(), "Stream client connected");

    let period = state.config.heartbeat_interval().max(Duration::from_millis(1));
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let connection = ConnectionStream {
        frames: rx,
        heartbeat,
        shutdown: state.shutdown.clone(),
        _guard: ConnectionGuard {
            state,
            conn_id,
            _subscription: subscription,
        },
    };

    stream::once(future::ready(Frame::connected(CONNECTED_MESSAGE))).chain(stream::unfold(
        connection,
        |mut conn| async move {
            let frame = tokio::select! {
                biased;
                _ = conn.shutdown.cancelled() => return None,
                frame = conn.frames.recv() => frame?,
                _ = conn.heartbeat.tick() => Frame::heartbeat(),
            };
            Some((frame, conn))
        },
    ))
}

pub async fn events_handler(State(state): State<Arc<GatewayState>>) -> Response {
    let body = operation_stream(state).map(|frame| Ok::<_, Infallible>(Bytes::from(frame.encode())));
    event_stream_response(Body::from_stream(body), "no-cache")
}

/// Accept a surface's answer to a `requestSnapshot` and publish it.
pub async fn snapshot_handler(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> impl IntoResponse {
    match serde_json::from_slice::<SnapshotResponsePayload>(&body) {
        Ok(payload) => {
            let op = Operation::snapshot_response(&payload.request_id, Value::Object(payload.snapshot));
            let delivered = state.bus.publish(&op);
            #[cfg(feature = "metrics")]
            crate::metrics::record_snapshot_request("accepted");
            debug!(request_id = %payload.request_id, delivered, "Snapshot response received");
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        Err(e) => {
            #[cfg(feature = "metrics")]
            crate::metrics::record_snapshot_request("rejected");
            warn!(error = %e, "Malformed snapshot post");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": SNAPSHOT_FAILED })),
            )
        }
    }
}
