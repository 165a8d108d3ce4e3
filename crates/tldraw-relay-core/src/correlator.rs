//! Snapshot request/response correlation.
//!
//! `request` publishes a `requestSnapshot` operation and waits for the
//! `snapshotResponse` carrying the same `requestId`, or for the timeout.
//! Each in-flight request owns one entry in the correlation table; whichever
//! side removes that entry first (response listener or timeout) resolves the
//! call, and the other side finds nothing and does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bus::OperationBus;
use crate::operation::{Operation, kind};

pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Result of a snapshot round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Captured(Value),
    TimedOut { request_id: String },
}

/// One live correlation entry.
pub struct PendingSnapshotRequest {
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    slot: oneshot::Sender<Value>,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingSnapshotRequest>>>;

fn lock(table: &PendingTable) -> MutexGuard<'_, HashMap<String, PendingSnapshotRequest>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SnapshotCorrelator {
    bus: Arc<OperationBus>,
    pending: PendingTable,
    timeout: Duration,
    sequence: AtomicU64,
}

impl SnapshotCorrelator {
    pub fn new(bus: Arc<OperationBus>, timeout: Duration) -> Self {
        Self {
            bus,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of requests still waiting for a response or a timeout.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// `snapshot-<unix millis>-<sequence>`; the sequence makes ids unique
    /// even for requests started within the same millisecond.
    fn next_request_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("snapshot-{}-{seq}", Utc::now().timestamp_millis())
    }

    /// Ask every connected surface for a snapshot and wait for the first
    /// matching answer.
    pub async fn request(&self) -> SnapshotOutcome {
        let request_id = self.next_request_id();
        let (slot, mut rx) = oneshot::channel();

        lock(&self.pending).insert(
            request_id.clone(),
            PendingSnapshotRequest {
                request_id: request_id.clone(),
                created_at: Utc::now(),
                slot,
            },
        );
        // Removes the entry if this future is dropped before resolving.
        let _entry = PendingEntry {
            table: self.pending.clone(),
            request_id: request_id.clone(),
        };

        let table = self.pending.clone();
        let wanted = request_id.clone();
        let listener = self.bus.subscribe_guarded(move |op| {
            if !op.is(kind::SNAPSHOT_RESPONSE) || op.request_id() != Some(wanted.as_str()) {
                return;
            }
            let snapshot = op.payload.get("snapshot").cloned().unwrap_or(Value::Null);
            // Send while holding the table lock so the timeout side never
            // observes a removed entry whose value is not yet in the slot.
            let mut pending = lock(&table);
            if let Some(entry) = pending.remove(&wanted) {
                debug!(
                    request_id = %entry.request_id,
                    waited_ms = (Utc::now() - entry.created_at).num_milliseconds(),
                    "Snapshot response matched"
                );
                let _ = entry.slot.send(snapshot);
            }
        });

        info!(request_id = %request_id, "Requesting snapshot");
        self.bus.publish(&Operation::snapshot_request(&request_id));

        let waited = tokio::time::timeout(self.timeout, &mut rx).await;
        let outcome = match waited {
            Ok(Ok(snapshot)) => SnapshotOutcome::Captured(snapshot),
            Ok(Err(_)) => SnapshotOutcome::TimedOut {
                request_id: request_id.clone(),
            },
            Err(_) => {
                let claimed = lock(&self.pending).remove(&request_id);
                match claimed {
                    Some(_) => SnapshotOutcome::TimedOut {
                        request_id: request_id.clone(),
                    },
                    // The response won the race right at the deadline.
                    None => match rx.try_recv() {
                        Ok(snapshot) => SnapshotOutcome::Captured(snapshot),
                        Err(_) => SnapshotOutcome::TimedOut {
                            request_id: request_id.clone(),
                        },
                    },
                }
            }
        };
        drop(listener);

        match &outcome {
            SnapshotOutcome::Captured(_) => debug!(request_id = %request_id, "Snapshot captured"),
            SnapshotOutcome::TimedOut { .. } => {
                warn!(request_id = %request_id, timeout_ms = self.timeout.as_millis() as u64, "Snapshot request timed out")
            }
        }
        outcome
    }
}

struct PendingEntry {
    table: PendingTable,
    request_id: String,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.request_id);
    }
}
