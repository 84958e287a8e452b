mod agent;
mod chat;
mod extract;
mod foreach;
mod input;
mod invoke;
mod judge;
mod merge;
mod output;
mod state;
mod switch;
mod template;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use clawdini_core::error::{ClawdiniError, Result};
use clawdini_core::graph::{GraphNode, NodeKind};

use crate::runner::{GraphRunner, Incoming, NodeOutcome};

/// Dispatch a node to its executor. Every failure comes back as a single
/// node error with a human message; the scheduler decides what to emit.
pub(crate) async fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: Vec<Incoming>,
) -> Result<NodeOutcome> {
    match node.kind {
        NodeKind::Input => input::execute(node, &inputs),
        NodeKind::Template => template::execute(runner, node, &inputs),
        NodeKind::Agent => agent::execute(runner, node, &inputs).await,
        NodeKind::Merge => merge::execute(runner, node, &inputs).await,
        NodeKind::Judge => judge::execute(runner, node, &inputs).await,
        NodeKind::Switch => switch::execute(runner, node, &inputs),
        NodeKind::Extract => extract::execute(runner, node, &inputs).await,
        NodeKind::Invoke => invoke::execute(runner, node, &inputs).await,
        NodeKind::Foreach => foreach::execute(runner, node, &inputs).await,
        NodeKind::State => state::execute(runner, node, &inputs),
        NodeKind::Output => output::execute(&inputs),
    }
}

/// Parse a node's kind-specific configuration; a null config means defaults.
fn parse_config<T: DeserializeOwned + Default>(config: &Value) -> Result<T> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone())
        .map_err(|e| ClawdiniError::Node(format!("invalid node config: {e}")))
}

/// Concatenate upstream texts with blank lines, the aggregation every
/// text-consuming executor uses.
fn joined_text(inputs: &[Incoming]) -> String {
    inputs
        .iter()
        .map(|i| i.payload.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First structured value offered by any upstream payload.
fn first_json(inputs: &[Incoming]) -> Option<Value> {
    inputs.iter().find_map(|i| i.payload.json.clone())
}

/// Strip markdown code fences models wrap around JSON despite instructions.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            return &trimmed[start..=end];
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_fenced() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_bare_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_embedded() {
        let raw = "Here you go: {\"a\": 1} — enjoy";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json("  [1, 2]  "), "[1, 2]");
    }
}
