//! The chat round-trip shared by agent, merge, judge, and extract nodes:
//! reset the session, patch the model, send, then fold the gateway's
//! cumulative delta stream into incremental node events until `final`.

use std::time::Duration;

use tracing::{debug, warn};

use clawdini_core::error::{ClawdiniError, Result};
use clawdini_core::event::RunEvent;
use clawdini_core::traits::ChatSendOptions;
use clawdini_core::types::{
    session_key, ChatCollector, ChatState, NodePayload, SessionPurpose,
};

use crate::runner::{ChatOp, GraphRunner};

pub(crate) struct ChatRequest<'a> {
    pub agent_id: &'a str,
    pub purpose: SessionPurpose,
    pub model_id: Option<&'a str>,
    pub prompt: &'a str,
    /// Return what arrived instead of failing when the deadline fires with
    /// partial output (merge semantics).
    pub partial_on_timeout: bool,
}

pub(crate) struct ChatOutput {
    pub text: String,
    pub session_key: String,
}

pub(crate) async fn run_chat(
    runner: &GraphRunner,
    node_id: &str,
    req: ChatRequest<'_>,
) -> Result<ChatOutput> {
    let session_key = session_key(req.agent_id, req.purpose, runner.run_id(), node_id);
    let gateway = runner.gateway();

    // A nonexistent session is expected on first use; reset failures are
    // logged and ignored.
    if let Err(e) = gateway.sessions_reset(&session_key).await {
        debug!(session_key = %session_key, error = %e, "sessions.reset failed");
    }
    if let Some(model) = req.model_id {
        gateway
            .sessions_patch(&session_key, serde_json::json!({ "model": model }))
            .await
            .map_err(|e| ClawdiniError::Node(format!("sessions.patch failed: {e}")))?;
    }

    // Subscribe before sending so no delta can slip past.
    let mut chat_rx = gateway.subscribe_chat();

    let sent = gateway
        .chat_send(
            &session_key,
            req.prompt,
            ChatSendOptions {
                idempotency_key: uuid::Uuid::new_v4().to_string(),
                timeout_ms: runner.config().chat_timeout_secs * 1000,
                model_id: req.model_id.map(str::to_string),
            },
        )
        .await
        .map_err(|e| ClawdiniError::Node(format!("chat.send failed: {e}")))?;

    runner.register_inflight(
        node_id,
        ChatOp {
            chat_run_id: sent.run_id.clone(),
            session_key: session_key.clone(),
        },
    );

    let result = wait_for_final(runner, node_id, &session_key, &mut chat_rx, req.partial_on_timeout).await;
    runner.clear_inflight(node_id);

    result.map(|text| ChatOutput { text, session_key })
}

async fn wait_for_final(
    runner: &GraphRunner,
    node_id: &str,
    session_key: &str,
    chat_rx: &mut tokio::sync::mpsc::UnboundedReceiver<clawdini_core::types::ChatEvent>,
    partial_on_timeout: bool,
) -> Result<String> {
    let timeout_secs = runner.config().chat_timeout_secs;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    let mut collector = ChatCollector::new();

    loop {
        let event = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                if partial_on_timeout && !collector.text().is_empty() {
                    warn!(node_id = %node_id, "chat timed out, keeping partial output");
                    return Ok(collector.text().to_string());
                }
                return Err(ClawdiniError::Timeout {
                    what: format!("chat for node {node_id}"),
                    secs: timeout_secs,
                });
            }
            event = chat_rx.recv() => match event {
                Some(event) => event,
                None => return Err(ClawdiniError::Transport("gateway chat stream closed".into())),
            },
        };

        if event.session_key != session_key {
            continue;
        }

        match event.state {
            ChatState::Delta | ChatState::Final => {
                if let Some(delta) = collector.push(&event.text()) {
                    runner.sink().emit(RunEvent::NodeDelta {
                        node_id: node_id.to_string(),
                        data: NodePayload::text(delta),
                    });
                    runner.sink().emit(RunEvent::Thinking {
                        node_id: node_id.to_string(),
                        content: preview(collector.text()),
                    });
                }
                if event.state == ChatState::Final {
                    return Ok(collector.text().to_string());
                }
            }
            ChatState::Error => {
                return Err(ClawdiniError::Node(
                    event
                        .error_message
                        .unwrap_or_else(|| "gateway reported a chat error".into()),
                ));
            }
            ChatState::Aborted => {
                return Err(ClawdiniError::Node("chat aborted".into()));
            }
        }
    }
}

/// One-line tail of the streamed text, for thinking events.
fn preview(text: &str) -> String {
    let start = text
        .char_indices()
        .rev()
        .nth(119)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].replace('\n', " ")
}
