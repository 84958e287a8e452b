use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use clawdini_core::error::{ClawdiniError, Result};
use clawdini_core::graph::GraphNode;
use clawdini_core::types::NodePayload;

use crate::runner::{GraphRunner, Incoming, NodeOutcome};
use crate::template::render;

use super::parse_config;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TemplateConfig {
    template: String,
    format: TemplateFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TemplateFormat {
    #[default]
    Text,
    Json,
}

/// Render `{{name.path}}` references against upstream payloads (by label,
/// falling back to node id) and the run's state namespaces.
pub(crate) fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: TemplateConfig = parse_config(&node.config)?;

    let mut upstream: HashMap<String, Value> = HashMap::new();
    for incoming in inputs {
        let key = incoming
            .label
            .clone()
            .unwrap_or_else(|| incoming.node_id.clone());
        let value = incoming
            .payload
            .json
            .clone()
            .unwrap_or_else(|| Value::String(incoming.payload.text.clone()));
        upstream.insert(key, value);
    }

    let rendered = render(&config.template, &upstream, &runner.state().snapshot());

    match config.format {
        TemplateFormat::Text => Ok(NodeOutcome::completed(NodePayload::text(rendered))),
        TemplateFormat::Json => {
            let parsed: Value = serde_json::from_str(&rendered).map_err(|e| {
                ClawdiniError::Node(format!("template rendered invalid JSON: {e}"))
            })?;
            Ok(NodeOutcome::completed(
                NodePayload::text(rendered).with_json(parsed),
            ))
        }
    }
}
