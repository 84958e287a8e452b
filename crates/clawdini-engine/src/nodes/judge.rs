use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use clawdini_core::error::Result;
use clawdini_core::graph::GraphNode;
use clawdini_core::types::{Decision, NodePayload, PayloadMeta, SessionPurpose};

use crate::runner::{GraphRunner, Incoming, NodeOutcome};

use super::chat::{run_chat, ChatRequest};
use super::{extract_json, joined_text, parse_config};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JudgeConfig {
    criteria: String,
    model_id: Option<String>,
    /// Informational until a downstream fieldMatch consumer evaluates it.
    pass_score: Option<u8>,
}

pub(crate) async fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: JudgeConfig = parse_config(&node.config)?;
    debug!(node_id = %node.id, pass_score = ?config.pass_score, "judging input");

    let input = joined_text(inputs);
    let prompt = format!(
        r#"You are a strict evaluator. Assess the input against these criteria:
{criteria}

Respond with ONLY raw JSON (no markdown fences, no commentary) of exactly this shape:
{{
  "status": "done" | "continue" | "needs_info" | "failed" | "human_review",
  "score": <integer 0-100>,
  "reasons": ["..."],
  "missing": ["..."],
  "nextActionHint": "...",
  "recommendedBranch": "..."
}}

--- INPUT ---
{input}"#,
        criteria = config.criteria,
        input = input,
    );

    let output = run_chat(
        runner,
        &node.id,
        ChatRequest {
            agent_id: "main",
            purpose: SessionPurpose::Judge,
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

    let raw = extract_json(&output.text);
    match serde_json::from_str::<Decision>(raw) {
        Ok(decision) => Ok(NodeOutcome::completed(NodePayload {
            text: raw.to_string(),
            json: Some(serde_json::to_value(&decision)?),
            meta,
        })),
        Err(e) => {
            // An unparseable verdict is still useful downstream as text.
            warn!(node_id = %node.id, error = %e, "judge output is not a decision");
            Ok(NodeOutcome::completed(NodePayload {
                text: output.text,
                json: None,
                meta,
            }))
        }
    }
}
