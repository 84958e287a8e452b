use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use clawdini_core::error::Result;
use clawdini_core::graph::GraphNode;
use clawdini_core::types::{NodePayload, PayloadMeta, SessionPurpose};

use crate::runner::{GraphRunner, Incoming, NodeOutcome};

use super::chat::{run_chat, ChatRequest};
use super::{extract_json, joined_text, parse_config};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExtractConfig {
    schema: String,
    model_id: Option<String>,
}

pub(crate) async fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: ExtractConfig = parse_config(&node.config)?;
    let input = joined_text(inputs);
    let prompt = format!(
        "Extract structured data from the input. Respond with ONLY JSON (no markdown fences, no commentary) matching this schema:\n{schema}\n\n--- INPUT ---\n{input}",
        schema = config.schema,
        input = input,
    );

    let output = run_chat(
        runner,
        &node.id,
        ChatRequest {
            agent_id: "main",
            purpose: SessionPurpose::Extract,
            model_id: config.model_id.as_deref(),
            prompt: &prompt,
            partial_on_timeout: false,
        },
    )
    .await?;

    let meta = PayloadMeta {
        session_key: Some(output.session_key),
        model_id: config.model_id,
        ..Default::default()
    };

    match serde_json::from_str::<Value>(extract_json(&output.text)) {
        Ok(parsed) => Ok(NodeOutcome::completed(NodePayload {
            text: "Successfully extracted JSON data.".to_string(),
            json: Some(parsed),
            meta,
        })),
        Err(e) => {
            warn!(node_id = %node.id, error = %e, "extract output is not JSON");
            Ok(NodeOutcome::completed(NodePayload {
                text: output.text,
                json: None,
                meta,
            }))
        }
    }
}
