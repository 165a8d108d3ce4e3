//! Shared state for the broadcast server and the relay proxy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use tldraw_relay_core::config::Config;
use tldraw_relay_core::{OperationBus, SnapshotCorrelator};
use tldraw_relay_tools::ToolDispatcher;

/// Shared broadcast-server state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub bus: Arc<OperationBus>,
    pub snapshots: Arc<SnapshotCorrelator>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub connections: Mutex<HashMap<String, StreamConnection>>,
    /// Cancelled on shutdown; ends every open stream.
    pub shutdown: CancellationToken,
}

/// One open event-stream connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConnection {
    pub conn_id: String,
    pub connected_at: DateTime<Utc>,
}

impl GatewayState {
    /// Wire a fresh bus, correlator and dispatcher from `config`.
    pub fn new(config: Arc<Config>) -> Self {
        let bus = Arc::new(OperationBus::new());
        let snapshots = Arc::new(SnapshotCorrelator::new(
            bus.clone(),
            config.snapshot_timeout(),
        ));
        let dispatcher = Arc::new(ToolDispatcher::new(bus.clone(), snapshots.clone()));

        #[cfg(feature = "metrics")]
        bus.subscribe(|op| crate::metrics::record_operation(&op.kind));

        Self {
            config,
            bus,
            snapshots,
            dispatcher,
            connections: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn connections(&self) -> MutexGuard<'_, HashMap<String, StreamConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }

    /// Open connections, oldest first.
    pub fn connection_list(&self) -> Vec<StreamConnection> {
        let mut list: Vec<StreamConnection> = self.connections().values().cloned().collect();
        list.sort_by_key(|c| c.connected_at);
        list
    }
}

/// State of the relay proxy: where upstream lives and the client used to
/// reach it.
pub struct RelayState {
    pub upstream_url: String,
    pub snapshot_url: String,
    pub client: reqwest::Client,
    pub shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_urls(config.upstream_url(), config.snapshot_url())
    }

    pub fn with_urls(
        upstream_url: impl Into<String>,
        snapshot_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        // No overall timeout: the upstream stream is expected to stay open.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            upstream_url: upstream_url.into(),
            snapshot_url: snapshot_url.into(),
            client,
            shutdown: CancellationToken::new(),
        })
    }
}
