use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use clawdini_core::error::{ClawdiniError, Result};
use clawdini_core::graph::GraphNode;
use clawdini_core::types::NodePayload;

use crate::runner::{GraphRunner, Incoming, NodeOutcome};

use super::{joined_text, parse_config};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InvokeConfig {
    command_name: String,
    payload_template: String,
}

/// Substitute the JSON-escaped upstream text into the payload template and
/// invoke the named gateway command. RPC failure is fatal for this node.
pub(crate) async fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: InvokeConfig = parse_config(&node.config)?;
    if config.command_name.is_empty() {
        return Err(ClawdiniError::Node("invoke node has no command configured".into()));
    }

    let escaped = json_escape(&joined_text(inputs));
    let rendered = config.payload_template.replace("{INPUT}", &escaped);
    let params = match serde_json::from_str::<Value>(&rendered) {
        Ok(value) => value,
        Err(_) => serde_json::json!({ "payload": rendered }),
    };

    let result = runner
        .gateway()
        .request(&config.command_name, params)
        .await
        .map_err(|e| ClawdiniError::Node(format!("{} failed: {e}", config.command_name)))?;

    let payload = match result {
        Value::String(text) => NodePayload::text(text),
        Value::Null => NodePayload::text(""),
        structured => NodePayload::text(serde_json::to_string(&structured)?).with_json(structured),
    };
    Ok(NodeOutcome::completed(payload))
}

/// Escape text for embedding inside a JSON string literal.
fn json_escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_escape() {
        assert_eq!(json_escape(r#"a "b" \ c"#), r#"a \"b\" \\ c"#);
        assert_eq!(json_escape("line1\nline2"), "line1\\nline2");
    }

    #[test]
    fn test_escaped_text_embeds_in_template() {
        let template = r#"{"query": "{INPUT}"}"#;
        let rendered = template.replace("{INPUT}", &json_escape("say \"hi\"\nplease"));
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["query"], "say \"hi\"\nplease");
    }
}
