use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use clawdini_core::error::Result;
use clawdini_core::graph::GraphNode;
use clawdini_core::types::NodePayload;

use crate::runner::{GraphRunner, Incoming, NodeOutcome};
use crate::state::StateMode;

use super::{first_json, joined_text, parse_config};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StateConfig {
    namespace: String,
    mode: StateMode,
}

/// Fold the input into the run's keyed memory, where template nodes read it
/// back through the `state.<namespace>` scope.
pub(crate) fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: StateConfig = parse_config(&node.config)?;
    let namespace = if config.namespace.is_empty() {
        "default".to_string()
    } else {
        config.namespace
    };

    let value = first_json(inputs).unwrap_or_else(|| Value::String(joined_text(inputs)));
    let updated = runner.state().apply(&namespace, config.mode, value);

    Ok(NodeOutcome::completed(
        NodePayload::text(format!("State '{namespace}' updated")).with_json(updated),
    ))
}
