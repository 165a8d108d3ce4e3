//! Flowchart step tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use tldraw_relay_core::operation::{FlowchartStepPayload, kind};

use crate::{Tool, ToolContext, ToolOutput, parse_args, publish};

/// Horizontal spacing between auto-placed steps.
pub const STEP_SPACING: f64 = 200.0;
/// Row used for auto-placed steps.
pub const STEP_ROW_Y: f64 = 200.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowchartStepArgs {
    step_number: u32,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    connect_to_previous: Option<bool>,
}

pub struct FlowchartStepTool;

#[async_trait]
impl Tool for FlowchartStepTool {
    fn name(&self) -> &str {
        kind::CREATE_FLOWCHART_STEP
    }

    fn description(&self) -> &str {
        "Add a numbered flowchart step. Steps are laid out left to right when no position is given \
         and are linked to the previous step unless connectToPrevious is false."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "stepNumber": { "type": "integer", "minimum": 1 },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "x": { "type": "number", "description": "Default: stepNumber * 200" },
                "y": { "type": "number", "description": "Default: 200" },
                "connectToPrevious": { "type": "boolean", "description": "Default: true" }
            },
            "required": ["stepNumber", "title"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let args: FlowchartStepArgs = match parse_args(self.name(), params) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        if args.step_number < 1 {
            return Ok(ToolOutput::error(
                "Invalid arguments for createFlowchartStep: stepNumber must be at least 1",
            ));
        }

        let payload = FlowchartStepPayload {
            step_number: args.step_number,
            title: args.title,
            description: args.description.unwrap_or_default(),
            x: args.x.unwrap_or(f64::from(args.step_number) * STEP_SPACING),
            y: args.y.unwrap_or(STEP_ROW_Y),
            connect_to_previous: args.connect_to_previous != Some(false),
        };
        publish(context, kind::CREATE_FLOWCHART_STEP, &payload)?;

        Ok(ToolOutput::text(format!(
            "Created flowchart step {}: {}",
            payload.step_number, payload.title
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::recording_context;

    #[tokio::test]
    async fn test_step_defaults() {
        let (ctx, seen) = recording_context();
        let out = FlowchartStepTool
            .execute(json!({"stepNumber": 3, "title": "Review"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "Created flowchart step 3: Review");

        let seen = seen.lock().unwrap();
        assert_eq!(
            serde_json::Value::Object(seen[0].payload.clone()),
            json!({
                "stepNumber": 3,
                "title": "Review",
                "description": "",
                "x": 600.0,
                "y": 200.0,
                "connectToPrevious": true
            })
        );
    }

    #[tokio::test]
    async fn test_explicit_position_and_no_link() {
        let (ctx, seen) = recording_context();
        FlowchartStepTool
            .execute(
                json!({
                    "stepNumber": 1,
                    "title": "Start",
                    "description": "kick-off",
                    "x": 0,
                    "y": 0,
                    "connectToPrevious": false
                }),
                &ctx,
            )
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let payload = &seen[0].payload;
        // Zero is a real coordinate, not "missing".
        assert_eq!(payload["x"], json!(0.0));
        assert_eq!(payload["y"], json!(0.0));
        assert_eq!(payload["connectToPrevious"], false);
        assert_eq!(payload["description"], "kick-off");
    }

    #[tokio::test]
    async fn test_connect_true_when_explicit() {
        let (ctx, seen) = recording_context();
        FlowchartStepTool
            .execute(json!({"stepNumber": 2, "title": "B", "connectToPrevious": true}), &ctx)
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap()[0].payload["connectToPrevious"], true);
    }

    #[tokio::test]
    async fn test_step_zero_rejected() {
        let (ctx, seen) = recording_context();
        let out = FlowchartStepTool
            .execute(json!({"stepNumber": 0, "title": "Nope"}), &ctx)
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(seen.lock().unwrap().is_empty());
    }
}
