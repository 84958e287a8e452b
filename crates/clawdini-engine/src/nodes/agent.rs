use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use clawdini_core::error::Result;
use clawdini_core::graph::GraphNode;
use clawdini_core::types::{NodePayload, PayloadMeta, SessionPurpose};

use crate::runner::{GraphRunner, Incoming, NodeOutcome};

use super::chat::{run_chat, ChatRequest};
use super::{joined_text, parse_config};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AgentConfig {
    agent_id: String,
    model_id: Option<String>,
    role: Option<AgentRole>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AgentRole {
    Planner,
    Critic,
    Researcher,
    Operator,
    Custom,
}

const PLANNER_PROMPT: &str = "You are a planning specialist. Break the input down into a concrete, ordered plan with clear steps, owners, and success criteria.";
const CRITIC_PROMPT: &str = "You are a critical reviewer. Identify weaknesses, gaps, and risks in the input and propose specific improvements.";
const RESEARCHER_PROMPT: &str = "You are a research specialist. Gather the relevant facts, note what you rely on, and summarize your findings about the input.";
const OPERATOR_PROMPT: &str = "You are an execution specialist. Carry out the requested work directly and report exactly what was done.";

fn role_preset(role: AgentRole) -> Option<&'static str> {
    match role {
        AgentRole::Planner => Some(PLANNER_PROMPT),
        AgentRole::Critic => Some(CRITIC_PROMPT),
        AgentRole::Researcher => Some(RESEARCHER_PROMPT),
        AgentRole::Operator => Some(OPERATOR_PROMPT),
        AgentRole::Custom => None,
    }
}

pub(crate) async fn execute(
    runner: &Arc<GraphRunner>,
    node: &GraphNode,
    inputs: &[Incoming],
) -> Result<NodeOutcome> {
    let config: AgentConfig = parse_config(&node.config)?;
    let agent_id = if config.agent_id.is_empty() {
        "main".to_string()
    } else {
        config.agent_id
    };

    let mut prompt = joined_text(inputs);
    if let Some(system) = config.role.and_then(role_preset) {
        prompt = format!("{system}\n\n--- INPUT ---\n{prompt}");
    }

    let started = Instant::now();
    let output = run_chat(
        runner,
        &node.id,
        ChatRequest {
            agent_id: &agent_id,
            purpose: SessionPurpose::Clawdini,
            model_id: config.model_id.as_deref(),
            prompt: &prompt,
            partial_on_timeout: false,
        },
    )
    .await?;

    Ok(NodeOutcome::completed(NodePayload {
        text: output.text,
        json: None,
        meta: PayloadMeta {
            session_key: Some(output.session_key),
            model_id: config.model_id,
            agent_id: Some(agent_id),
            latency_ms: Some(started.elapsed().as_millis() as u64),
            ..Default::default()
        },
    }))
}
