use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{AgentsList, ChatEvent, ChatSendResult, ModelsList};

/// Options for `chat.send`.
#[derive(Debug, Clone, Default)]
pub struct ChatSendOptions {
    pub idempotency_key: String,
    pub timeout_ms: u64,
    pub model_id: Option<String>,
}

/// Gateway session-protocol client — correlated RPCs plus chat event fan-out.
///
/// The engine talks to the remote gateway exclusively through this trait so
/// runners can be driven by an in-process fake in tests. One instance is
/// shared by all runners and their children.
pub trait Gateway: Send + Sync + 'static {
    /// Correlated request/response call. Resolves with the response payload
    /// or the gateway's error, bounded by the client's per-request timeout.
    fn request(&self, method: &str, params: Value) -> BoxFuture<'_, Result<Value>>;

    /// Subscribe to the gateway's `chat` event stream. The subscription ends
    /// when the receiver is dropped.
    fn subscribe_chat(&self) -> mpsc::UnboundedReceiver<ChatEvent>;

    fn agents_list(&self) -> BoxFuture<'_, Result<AgentsList>> {
        Box::pin(async move {
            let payload = self.request("agents.list", Value::Null).await?;
            Ok(serde_json::from_value(payload)?)
        })
    }

    fn models_list(&self) -> BoxFuture<'_, Result<ModelsList>> {
        Box::pin(async move {
            let payload = self.request("models.list", Value::Null).await?;
            Ok(serde_json::from_value(payload)?)
        })
    }

    fn sessions_reset(&self, session_key: &str) -> BoxFuture<'_, Result<Value>> {
        let params = json!({ "sessionKey": session_key });
        Box::pin(async move { self.request("sessions.reset", params).await })
    }

    /// Patch session settings, e.g. `{"model": "..."}`.
    fn sessions_patch(&self, session_key: &str, patch: Value) -> BoxFuture<'_, Result<Value>> {
        let mut params = json!({ "sessionKey": session_key });
        if let (Some(obj), Some(patch)) = (params.as_object_mut(), patch.as_object()) {
            for (key, value) in patch {
                obj.insert(key.clone(), value.clone());
            }
        }
        Box::pin(async move { self.request("sessions.patch", params).await })
    }

    fn chat_send(
        &self,
        session_key: &str,
        message: &str,
        opts: ChatSendOptions,
    ) -> BoxFuture<'_, Result<ChatSendResult>> {
        let mut params = json!({
            "sessionKey": session_key,
            "message": message,
            "idempotencyKey": opts.idempotency_key,
            "timeoutMs": opts.timeout_ms,
        });
        if let Some(model_id) = &opts.model_id {
            params["modelId"] = json!(model_id);
        }
        Box::pin(async move {
            let payload = self.request("chat.send", params).await?;
            Ok(serde_json::from_value(payload)?)
        })
    }

    fn chat_abort(&self, session_key: &str, run_id: Option<&str>) -> BoxFuture<'_, Result<Value>> {
        let mut params = json!({ "sessionKey": session_key });
        if let Some(run_id) = run_id {
            params["runId"] = json!(run_id);
        }
        Box::pin(async move { self.request("chat.abort", params).await })
    }
}
