use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use clawdini_core::error::Result;
use clawdini_core::graph::GraphNode;
use clawdini_core::types::NodePayload;

use crate::runner::{GraphRunner, Incoming, NodeOutcome};
use crate::subgraph::successor_subgraph;
use crate::template::walk_path;

use super::{first_json, joined_text, parse_config};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ForeachConfig {
    array_path: Option<String>,
}

/// Fan the downstream sub-graph out over an input array: one child runner
/// per element, run concurrently. The parent's own copies of the successor
/// nodes are routed away by disabling this node's out-edges.
pub(crate) async fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: ForeachConfig = parse_config(&node.config)?;

    let base = first_json(inputs)
        .or_else(|| serde_json::from_str(&joined_text(inputs)).ok());
    let target = match &config.array_path {
        Some(path) if !path.is_empty() => base
            .as_ref()
            .and_then(|value| walk_path(value, path))
            .cloned(),
        _ => base,
    };

    let items = match target {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => {
            debug!(node_id = %node.id, "foreach input is not a non-empty array, halting branch");
            return Ok(NodeOutcome {
                payload: NodePayload::text("Halted (No Array Found)"),
                disable_edges: runner
                    .graph()
                    .outgoing(&node.id)
                    .map(|e| e.id.clone())
                    .collect(),
            });
        }
    };

    let sub = successor_subgraph(runner.graph(), &node.id);
    let disable_edges: Vec<String> = runner
        .graph()
        .outgoing(&node.id)
        .map(|e| e.id.clone())
        .collect();

    info!(
        node_id = %node.id,
        items = items.len(),
        sub_nodes = sub.nodes.len(),
        "spawning foreach children"
    );

    let mut children = Vec::new();
    for item in &items {
        let input = match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let child = runner.child(sub.clone(), input);
        children.push(async move { child.run().await });
    }
    futures::future::join_all(children).await;

    Ok(NodeOutcome {
        payload: NodePayload::text(format!(
            "Completed {} parallel sub-executions.",
            items.len()
        )),
        disable_edges,
    })
}
