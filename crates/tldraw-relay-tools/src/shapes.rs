//! Shape, connector and text tools.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use tldraw_relay_core::operation::{
    AddTextPayload, ArrowType, ConnectShapesPayload, CreateShapePayload, kind,
};

use crate::{Tool, ToolContext, ToolOutput, parse_args, publish};

pub const DEFAULT_FONT_SIZE: f64 = 20.0;

/// Shape kinds the rendering surface can draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Rectangle,
    Ellipse,
    Triangle,
    Diamond,
}

impl ShapeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rectangle => "rectangle",
            Self::Ellipse => "ellipse",
            Self::Triangle => "triangle",
            Self::Diamond => "diamond",
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateShapeArgs {
    #[serde(rename = "type", alias = "shapeType")]
    shape_type: ShapeType,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default)]
    text: Option<String>,
}

pub struct CreateShapeTool;

#[async_trait]
impl Tool for CreateShapeTool {
    fn name(&self) -> &str {
        kind::CREATE_SHAPE
    }

    fn description(&self) -> &str {
        "Create a shape (rectangle, ellipse, triangle or diamond) on the canvas, optionally with a text label."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["rectangle", "ellipse", "triangle", "diamond"],
                    "description": "Shape to draw"
                },
                "x": { "type": "number" },
                "y": { "type": "number" },
                "width": { "type": "number" },
                "height": { "type": "number" },
                "text": { "type": "string", "description": "Label inside the shape" }
            },
            "required": ["type", "x", "y", "width", "height"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let args: CreateShapeArgs = match parse_args(self.name(), params) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };

        let payload = CreateShapePayload {
            shape_type: args.shape_type.as_str().to_string(),
            x: args.x,
            y: args.y,
            width: args.width,
            height: args.height,
            text: args.text.unwrap_or_default(),
        };
        let delivered = publish(context, kind::CREATE_SHAPE, &payload)?;
        debug!(shape = %payload.shape_type, delivered, "createShape published");

        Ok(ToolOutput::text(format!(
            "Created a {} at position ({}, {})",
            payload.shape_type, payload.x, payload.y
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectShapesArgs {
    from_id: String,
    to_id: String,
    #[serde(default)]
    arrow_type: Option<ArrowType>,
}

pub struct ConnectShapesTool;

#[async_trait]
impl Tool for ConnectShapesTool {
    fn name(&self) -> &str {
        kind::CONNECT_SHAPES
    }

    fn description(&self) -> &str {
        "Draw an arrow from one shape to another. Flowchart steps can be referenced as 'step-<n>'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "fromId": { "type": "string" },
                "toId": { "type": "string" },
                "arrowType": {
                    "type": "string",
                    "enum": ["straight", "curved", "orthogonal"],
                    "description": "Arrow routing (default: straight)"
                }
            },
            "required": ["fromId", "toId"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let args: ConnectShapesArgs = match parse_args(self.name(), params) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };

        let payload = ConnectShapesPayload {
            from_id: args.from_id,
            to_id: args.to_id,
            arrow_type: args.arrow_type.unwrap_or_default(),
        };
        publish(context, kind::CONNECT_SHAPES, &payload)?;

        Ok(ToolOutput::text(format!(
            "Connected shape {} to {}",
            payload.from_id, payload.to_id
        )))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTextArgs {
    x: f64,
    y: f64,
    text: String,
    #[serde(default)]
    font_size: Option<f64>,
}

pub struct AddTextTool;

#[async_trait]
impl Tool for AddTextTool {
    fn name(&self) -> &str {
        kind::ADD_TEXT
    }

    fn description(&self) -> &str {
        "Place free-standing text on the canvas."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "x": { "type": "number" },
                "y": { "type": "number" },
                "text": { "type": "string" },
                "fontSize": { "type": "number", "description": "Font size (default: 20)" }
            },
            "required": ["x", "y", "text"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let args: AddTextArgs = match parse_args(self.name(), params) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };

        let payload = AddTextPayload {
            x: args.x,
            y: args.y,
            text: args.text,
            font_size: args.font_size.unwrap_or(DEFAULT_FONT_SIZE),
        };
        publish(context, kind::ADD_TEXT, &payload)?;

        Ok(ToolOutput::text(format!(
            "Added text \"{}\" at position ({}, {})",
            payload.text, payload.x, payload.y
        )))
    }
}
