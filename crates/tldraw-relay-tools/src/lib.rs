//! Drawing tools exposed to the tool-calling client.
//!
//! Each tool implements the [`Tool`] trait: it receives type-checked
//! arguments, fills in defaults, publishes one [`Operation`] on the bus and
//! answers with a short confirmation. `getSnapshot` is the exception; it
//! waits on the [`SnapshotCorrelator`] instead.
//!
//! [`Operation`]: tldraw_relay_core::Operation

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tldraw_relay_core::{OperationBus, SnapshotCorrelator};

pub mod dispatcher;
pub mod flowchart;
pub mod shapes;
pub mod snapshot;

pub use dispatcher::ToolDispatcher;

/// Context provided to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub bus: Arc<OperationBus>,
    pub snapshots: Arc<SnapshotCorrelator>,
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            snapshot: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            snapshot: None,
        }
    }
}

/// The core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the client (e.g., "createShape").
    fn name(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Human-readable description for the client.
    fn description(&self) -> &str;

    /// Execute the tool with the given parameters.
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput>;
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Tool definitions in the shape tool-calling clients expect.
    pub fn definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "input_schema": t.parameters_schema(),
                })
            })
            .collect()
    }
}

/// Register every drawing tool.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Box::new(shapes::CreateShapeTool));
    registry.register(Box::new(shapes::ConnectShapesTool));
    registry.register(Box::new(shapes::AddTextTool));
    registry.register(Box::new(flowchart::FlowchartStepTool));
    registry.register(Box::new(snapshot::GetSnapshotTool));
}

/// Deserialize tool arguments, mapping failure to an error output.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    tool: &str,
    params: serde_json::Value,
) -> Result<T, ToolOutput> {
    serde_json::from_value(params)
        .map_err(|e| ToolOutput::error(format!("Invalid arguments for {tool}: {e}")))
}

/// Publish an operation built from a typed payload and report how many
/// connections received it.
pub(crate) fn publish<T: Serialize>(
    context: &ToolContext,
    kind: &str,
    payload: &T,
) -> anyhow::Result<usize> {
    let op = tldraw_relay_core::Operation::from_payload(kind, payload)?;
    Ok(context.bus.publish(&op))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tldraw_relay_core::{Operation, OperationBus, SnapshotCorrelator};

    use crate::ToolContext;

    /// A context whose bus records every published operation.
    pub fn recording_context() -> (ToolContext, Arc<Mutex<Vec<Operation>>>) {
        let bus = Arc::new(OperationBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |op| sink.lock().unwrap().push(op.clone()));
        let snapshots = Arc::new(SnapshotCorrelator::new(bus.clone(), Duration::from_millis(5000)));
        (ToolContext { bus, snapshots }, seen)
    }
}
