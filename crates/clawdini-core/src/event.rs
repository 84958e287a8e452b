use serde::{Deserialize, Serialize};

use crate::types::NodePayload;

/// An event emitted into a run's event stream.
///
/// `NodeDelta` carries only the newly revealed suffix, never the gateway's
/// cumulative text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String },
    #[serde(rename_all = "camelCase")]
    RunCompleted { run_id: String },
    #[serde(rename_all = "camelCase")]
    RunError { run_id: String, error: String },
    #[serde(rename_all = "camelCase")]
    RunCancelled { run_id: String },
    #[serde(rename_all = "camelCase")]
    NodeStarted { node_id: String, data: NodePayload },
    #[serde(rename_all = "camelCase")]
    NodeDelta { node_id: String, data: NodePayload },
    #[serde(rename_all = "camelCase")]
    NodeFinal { node_id: String, data: NodePayload },
    #[serde(rename_all = "camelCase")]
    NodeError { node_id: String, error: String },
    #[serde(rename_all = "camelCase")]
    NodeAborted { node_id: String },
    #[serde(rename_all = "camelCase")]
    Thinking { node_id: String, content: String },
}

impl RunEvent {
    /// Whether this event terminates its run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::RunCompleted { .. } | RunEvent::RunError { .. } | RunEvent::RunCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let event = RunEvent::NodeFinal {
            node_id: "n1".into(),
            data: NodePayload::text("done"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "nodeFinal", "nodeId": "n1", "data": {"text": "done", "meta": {}}})
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(RunEvent::RunCompleted { run_id: "r".into() }.is_terminal());
        assert!(RunEvent::RunCancelled { run_id: "r".into() }.is_terminal());
        assert!(!RunEvent::NodeAborted { node_id: "n".into() }.is_terminal());
    }
}
