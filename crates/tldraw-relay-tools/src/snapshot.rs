//! Snapshot tool: asks the connected surface for its current document.

use async_trait::async_trait;
use serde_json::json;

use tldraw_relay_core::SnapshotOutcome;

use crate::{Tool, ToolContext, ToolOutput};

pub struct GetSnapshotTool;

#[async_trait]
impl Tool for GetSnapshotTool {
    fn name(&self) -> &str {
        "getSnapshot"
    }

    fn description(&self) -> &str {
        "Capture the current diagram from the connected canvas. Fails after 5 seconds when no canvas answers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        match context.snapshots.request().await {
            SnapshotOutcome::Captured(snapshot) => Ok(ToolOutput {
                content: "Diagram snapshot captured".into(),
                is_error: false,
                snapshot: Some(snapshot),
            }),
            SnapshotOutcome::TimedOut { .. } => Ok(ToolOutput::error(
                "Failed to capture diagram snapshot (timeout)",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tldraw_relay_core::operation::kind;
    use tldraw_relay_core::{Operation, OperationBus, SnapshotCorrelator};

    fn context() -> ToolContext {
        let bus = Arc::new(OperationBus::new());
        let snapshots = Arc::new(SnapshotCorrelator::new(bus.clone(), Duration::from_millis(5000)));
        ToolContext { bus, snapshots }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_captured() {
        let ctx = context();
        // Stand-in surface: answer every request immediately.
        let responder_bus = Arc::downgrade(&ctx.bus);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        ctx.bus.subscribe(move |op| {
            if op.is(kind::REQUEST_SNAPSHOT) {
                let _ = tx.send(op.request_id().unwrap_or_default().to_string());
            }
        });
        tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                if let Some(bus) = responder_bus.upgrade() {
                    bus.publish(&Operation::snapshot_response(&id, json!({"store": {"a": 1}})));
                }
            }
        });

        let out = GetSnapshotTool.execute(json!({}), &ctx).await.unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content, "Diagram snapshot captured");
        assert_eq!(out.snapshot, Some(json!({"store": {"a": 1}})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_timeout() {
        let ctx = context();
        let out = GetSnapshotTool.execute(serde_json::Value::Null, &ctx).await.unwrap();
        assert!(out.is_error);
        assert_eq!(out.content, "Failed to capture diagram snapshot (timeout)");
        assert!(out.snapshot.is_none());
        assert_eq!(ctx.snapshots.pending_count(), 0);
        assert_eq!(ctx.bus.subscriber_count(), 0);
    }
}
