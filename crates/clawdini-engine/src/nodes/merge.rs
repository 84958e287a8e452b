use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use clawdini_core::error::Result;
use clawdini_core::graph::GraphNode;
use clawdini_core::types::{NodePayload, PayloadMeta, SessionPurpose};

use crate::runner::{GraphRunner, Incoming, NodeOutcome};

use super::chat::{run_chat, ChatRequest};
use super::parse_config;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MergeConfig {
    mode: MergeMode,
    model_id: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MergeMode {
    #[default]
    Concat,
    Llm,
    Consensus,
}

const SYNTHESIS_PROMPT: &str = "Synthesize the following sources into a single coherent answer. Preserve every important fact, resolve contradictions explicitly, and do not mention the sources themselves.";
const CONSENSUS_PROMPT: &str = "The following sources are positions taken by independent participants. Write meeting minutes that state the consensus reached, note each remaining disagreement, and list concrete action items.";

pub(crate) async fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: MergeConfig = parse_config(&node.config)?;

    if config.mode == MergeMode::Concat {
        return Ok(NodeOutcome::completed(NodePayload::text(sources_block(inputs))));
    }

    // llm / consensus: nothing to merge and single-input pass-through are
    // handled without a gateway round-trip.
    if inputs.is_empty() {
        return Ok(NodeOutcome::completed(NodePayload::text("")));
    }
    if inputs.len() == 1 {
        return Ok(NodeOutcome::completed(inputs[0].payload.clone()));
    }

    let block = sources_block(inputs);
    let prompt = match &config.prompt {
        Some(custom) if !custom.trim().is_empty() => replace_inputs_token(custom, &block),
        _ if config.mode == MergeMode::Consensus => format!("{CONSENSUS_PROMPT}\n\n{block}"),
        _ => format!("{SYNTHESIS_PROMPT}\n\n{block}"),
    };

    let started = Instant::now();
    let output = run_chat(
        runner,
        &node.id,
        ChatRequest {
            agent_id: "main",
            purpose: SessionPurpose::Merge,
            model_id: config.model_id.as_deref(),
            prompt: &prompt,
            // Partial output beats losing a long synthesis to the deadline.
            partial_on_timeout: true,
        },
    )
    .await?;

    Ok(NodeOutcome::completed(NodePayload {
        text: output.text,
        json: None,
        meta: PayloadMeta {
            session_key: Some(output.session_key),
            model_id: config.model_id,
            latency_ms: Some(started.elapsed().as_millis() as u64),
            ..Default::default()
        },
    }))
}

/// Number the sources the way downstream prompts and tests expect:
/// `=== Source 1 ===\nA\n\n=== Source 2 ===\nB\n`.
fn sources_block(inputs: &[Incoming]) -> String {
    if inputs.is_empty() {
        return String::new();
    }
    let blocks: Vec<String> = inputs
        .iter()
        .enumerate()
        .map(|(i, incoming)| format!("=== Source {} ===\n{}", i + 1, incoming.payload.text))
        .collect();
    format!("{}\n", blocks.join("\n\n"))
}

/// Replace `{INPUTS}` case-insensitively; a prompt without the token gets
/// the block appended.
fn replace_inputs_token(prompt: &str, block: &str) -> String {
    const TOKEN: &str = "{INPUTS}";
    let bytes = prompt.as_bytes();
    let mut out = String::new();
    let mut cursor = 0;
    let mut found = false;

    while cursor + TOKEN.len() <= bytes.len() {
        if bytes[cursor..cursor + TOKEN.len()].eq_ignore_ascii_case(TOKEN.as_bytes()) {
            out.push_str(block);
            cursor += TOKEN.len();
            found = true;
        } else {
            // Token boundaries are ASCII, so byte-wise advance stays on
            // char boundaries only when the current byte is ASCII; walk a
            // full char otherwise.
            let ch_len = prompt[cursor..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&prompt[cursor..cursor + ch_len]);
            cursor += ch_len;
        }
    }
    out.push_str(&prompt[cursor..]);

    if found {
        out
    } else {
        format!("{prompt}\n\n{block}")
    }
}
