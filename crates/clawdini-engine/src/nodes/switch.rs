use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use clawdini_core::error::Result;
use clawdini_core::graph::GraphNode;
use clawdini_core::types::NodePayload;

use crate::runner::{GraphRunner, Incoming, NodeOutcome};
use crate::template::walk_path;

use super::{first_json, joined_text, parse_config};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SwitchConfig {
    rules: Vec<SwitchRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchRule {
    #[serde(default)]
    id: String,
    mode: RuleMode,
    #[serde(default)]
    condition: String,
    #[serde(default)]
    value_match: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum RuleMode {
    Regex,
    FieldMatch,
}

/// Evaluate the rules against the merged input, then disable every out-edge
/// whose handle did not match. No match at all halts the branch entirely.
pub(crate) fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: SwitchConfig = parse_config(&node.config)?;
    let text = joined_text(inputs);
    let json = first_json(inputs);

    let mut matched: HashSet<&str> = HashSet::new();
    for rule in &config.rules {
        let hit = match rule.mode {
            RuleMode::Regex => match regex::Regex::new(&rule.condition) {
                Ok(re) => re.is_match(&text),
                Err(e) => {
                    warn!(rule = %rule.id, error = %e, "invalid regex in switch rule, skipping");
                    false
                }
            },
            RuleMode::FieldMatch => json
                .as_ref()
                .and_then(|value| walk_path(value, &rule.condition))
                .map(|field| match &rule.value_match {
                    Some(expected) => value_text(field) == *expected,
                    None => truthy(field),
                })
                .unwrap_or(false),
        };
        if hit {
            matched.insert(rule.id.as_str());
        }
    }
    debug!(node_id = %node.id, matched = matched.len(), "switch evaluated");

    let out_edges: Vec<_> = runner.graph().outgoing(&node.id).collect();
    if matched.is_empty() {
        return Ok(NodeOutcome {
            payload: NodePayload::text("Halted (No conditions matched)"),
            disable_edges: out_edges.iter().map(|e| e.id.clone()).collect(),
        });
    }

    let disable_edges: Vec<String> = out_edges
        .iter()
        .filter(|e| {
            !e.source_handle
                .as_deref()
                .is_some_and(|handle| matched.contains(handle))
        })
        .map(|e| e.id.clone())
        .collect();
    let routed = out_edges.len() - disable_edges.len();

    Ok(NodeOutcome {
        payload: NodePayload::text(format!("Flow routed to {routed} branches")),
        disable_edges,
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!({})));
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("done")), "done");
        assert_eq!(value_text(&json!(85)), "85");
        assert_eq!(value_text(&json!(true)), "true");
    }
}
