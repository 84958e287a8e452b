use serde::{Deserialize, Serialize};
use serde_json::Value;

use clawdini_core::error::Result;

/// A framed message on the gateway transport.
///
/// Three shapes share the wire; anything else is ignored for forward
/// compatibility. `seq` on events is carried for logging only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "req")]
    Request {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    #[serde(rename = "res")]
    Response {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorShape>,
    },
    #[serde(rename = "event")]
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl Frame {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("frame serializes")
    }

    /// Decode a frame, returning `None` for unknown frame types.
    pub fn decode(text: &str) -> Result<Option<Frame>> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            Some("req") | Some("res") | Some("event") => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }
}
