//! Drawing operations and their known payload shapes.
//!
//! An [`Operation`] is an open `kind` tag plus a JSON object payload. The
//! bus and the stream layers never interpret the kind, so operations the
//! rendering surface does not know about pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

/// Well-known operation kinds.
pub mod kind {
    pub const CREATE_SHAPE: &str = "createShape";
    pub const CONNECT_SHAPES: &str = "connectShapes";
    pub const ADD_TEXT: &str = "addText";
    pub const CREATE_FLOWCHART_STEP: &str = "createFlowchartStep";
    pub const REQUEST_SNAPSHOT: &str = "requestSnapshot";
    pub const SNAPSHOT_RESPONSE: &str = "snapshotResponse";
}

/// The canonical message unit flowing from the dispatcher to every
/// connected surface.
///
/// The tag is written as `"type"` on the wire because that is the field the
/// rendering surface switches on; `"kind"` is accepted when reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Operation {
    pub fn new(kind: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Build an operation from one of the typed payload records.
    pub fn from_payload<T: Serialize>(kind: &str, payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => Ok(Self::new(kind, map)),
            other => Err(RelayError::Other(anyhow::anyhow!(
                "payload for '{kind}' must serialize to a JSON object, got {other}"
            ))),
        }
    }

    pub fn snapshot_request(request_id: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("requestId".into(), Value::String(request_id.to_string()));
        Self::new(kind::REQUEST_SNAPSHOT, payload)
    }

    pub fn snapshot_response(request_id: &str, snapshot: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("requestId".into(), Value::String(request_id.to_string()));
        payload.insert("snapshot".into(), snapshot);
        Self::new(kind::SNAPSHOT_RESPONSE, payload)
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// The `requestId` correlation token, when the payload carries one.
    pub fn request_id(&self) -> Option<&str> {
        self.payload.get("requestId").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShapePayload {
    pub shape_type: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub text: String,
}

/// Arrow routing style for `connectShapes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrowType {
    #[default]
    Straight,
    Curved,
    Orthogonal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectShapesPayload {
    pub from_id: String,
    pub to_id: String,
    #[serde(default)]
    pub arrow_type: ArrowType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTextPayload {
    pub x: f64,
    pub y: f64,
    pub text: String,
    pub font_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowchartStepPayload {
    pub step_number: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub x: f64,
    pub y: f64,
    pub connect_to_previous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequestPayload {
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponsePayload {
    pub request_id: String,
    pub snapshot: Map<String, Value>,
}
