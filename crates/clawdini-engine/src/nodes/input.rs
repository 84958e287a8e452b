use serde::Deserialize;

use clawdini_core::error::Result;
use clawdini_core::graph::GraphNode;
use clawdini_core::types::NodePayload;

use crate::runner::{Incoming, NodeOutcome};

use super::{joined_text, parse_config};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InputConfig {
    prompt: String,
}

/// Emit the configured prompt. An input node with an empty prompt passes
/// the run's global input through instead, so child runs can seed their
/// roots the same way the parent seeds its own.
pub(crate) fn execute(node: &GraphNode, inputs: &[Incoming]) -> Result<NodeOutcome> {
    let config: InputConfig = parse_config(&node.config)?;
    let text = if config.prompt.is_empty() {
        joined_text(inputs)
    } else {
        config.prompt
    };
    Ok(NodeOutcome::completed(NodePayload::text(text)))
}
