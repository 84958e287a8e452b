use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The single value type that flows along graph edges.
///
/// `text` is never absent (the empty string is legal); `json` is present only
/// when the producer parsed a structured value. Once a node completes, its
/// payload is frozen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(default)]
    pub meta: PayloadMeta,
}

impl NodePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }
}

/// Metadata riding along with a payload. Keys this orchestrator does not
/// interpret are preserved opaquely in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The structured verdict produced by a judge node, carried in
/// `NodePayload.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub status: DecisionStatus,
    #[serde(default)]
    pub score: u8,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub next_action_hint: String,
    #[serde(default)]
    pub recommended_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Done,
    Continue,
    NeedsInfo,
    Failed,
    HumanReview,
}

/// What a chat session with the gateway is for. Part of the session key, so
/// concurrent nodes in one run never share a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPurpose {
    Clawdini,
    Merge,
    Judge,
    Extract,
}

impl std::fmt::Display for SessionPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPurpose::Clawdini => write!(f, "clawdini"),
            SessionPurpose::Merge => write!(f, "merge"),
            SessionPurpose::Judge => write!(f, "judge"),
            SessionPurpose::Extract => write!(f, "extract"),
        }
    }
}

/// Build the session key `agent:<agentId>:<purpose>:<runId>:<nodeId>`.
pub fn session_key(agent_id: &str, purpose: SessionPurpose, run_id: &str, node_id: &str) -> String {
    format!("agent:{}:{}:{}:{}", agent_id, purpose, run_id, node_id)
}

/// A `chat` event from the gateway.
///
/// Text carried by `delta` and `final` states is cumulative: every event
/// holds the full message so far, not an increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub session_key: String,
    pub state: ChatState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    Delta,
    Final,
    Error,
    Aborted,
}

impl ChatEvent {
    /// Extract the cumulative text from the event's message, which may be a
    /// plain string, a list of content blocks, or a bare `text` field.
    pub fn text(&self) -> String {
        let Some(message) = &self.message else {
            return String::new();
        };
        match message.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(blocks)) => blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
            _ => message
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Turns the gateway's cumulative text stream into incremental suffixes.
///
/// Feed every delta/final text through `push`; it yields only the portion
/// not seen before. When the producer re-issues text that is not a prefix
/// extension (rare), the tracked text is replaced and only the part past the
/// previously seen length is yielded.
#[derive(Debug, Default)]
pub struct ChatCollector {
    seen: String,
}

impl ChatCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full text observed so far.
    pub fn text(&self) -> &str {
        &self.seen
    }

    pub fn push(&mut self, cumulative: &str) -> Option<String> {
        if cumulative == self.seen {
            return None;
        }
        let delta = if let Some(suffix) = cumulative.strip_prefix(self.seen.as_str()) {
            suffix.to_string()
        } else {
            let mut start = self.seen.len().min(cumulative.len());
            while start > 0 && !cumulative.is_char_boundary(start) {
                start -= 1;
            }
            cumulative[start..].to_string()
        };
        self.seen = cumulative.to_string();
        if delta.is_empty() {
            None
        } else {
            Some(delta)
        }
    }
}

/// Result payload of `agents.list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsList {
    #[serde(default)]
    pub default_id: Option<String>,
    #[serde(default)]
    pub main_key: Option<String>,
    #[serde(default)]
    pub agents: Vec<AgentInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Value>,
}

/// Result payload of `models.list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsList {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Result payload of `chat.send`. The run id here is the gateway's chat run
/// id, distinct from the orchestrator's run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendResult {
    pub run_id: String,
}
