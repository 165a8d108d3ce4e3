//! Routes named tool calls to their implementation.

use std::sync::Arc;

use tracing::{info, warn};

use tldraw_relay_core::{OperationBus, SnapshotCorrelator};

use crate::{ToolContext, ToolOutput, ToolRegistry, register_builtin_tools};

pub struct ToolDispatcher {
    registry: ToolRegistry,
    context: ToolContext,
}

impl ToolDispatcher {
    /// A dispatcher carrying every built-in drawing tool.
    pub fn new(bus: Arc<OperationBus>, snapshots: Arc<SnapshotCorrelator>) -> Self {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);
        Self {
            registry,
            context: ToolContext { bus, snapshots },
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.registry.get(name).is_some()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.list()
    }

    pub fn definitions(&self) -> Vec<serde_json::Value> {
        self.registry.definitions()
    }

    /// Run `name` with `args`. Unknown tools are an `Err`; bad arguments
    /// come back as an error [`ToolOutput`].
    pub async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> anyhow::Result<ToolOutput> {
        let Some(tool) = self.registry.get(name) else {
            warn!(tool = name, "Unknown tool requested");
            anyhow::bail!("Unknown tool: {name}");
        };

        let started = std::time::Instant::now();
        let output = tool.execute(args, &self.context).await?;
        info!(
            tool = name,
            is_error = output.is_error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool executed"
        );
        Ok(output)
    }
}
