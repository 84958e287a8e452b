use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use clawdini_core::config::GatewayConfig;
use clawdini_core::error::{ClawdiniError, Result};
use clawdini_core::traits::Gateway;
use clawdini_core::types::ChatEvent;

use crate::identity::DeviceIdentity;
use crate::protocol::{ErrorShape, Frame};

const PROTOCOL_VERSION: u64 = 3;

/// Server-side details from the `hello-ok` handshake payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHello {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub conn_id: Option<String>,
    #[serde(default)]
    pub features: ServerFeatures,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerFeatures {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

type PendingSlot = oneshot::Sender<std::result::Result<Value, ErrorShape>>;

#[derive(Default)]
struct SubscriberTable {
    chat: Vec<mpsc::UnboundedSender<ChatEvent>>,
    raw: HashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<String, PendingSlot>>,
    subs: Mutex<SubscriberTable>,
}

impl Shared {
    fn route_frame(&self, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("ignoring unknown frame type from gateway");
                return;
            }
            Err(e) => {
                warn!(error = %e, "malformed frame from gateway");
                return;
            }
        };

        match frame {
            Frame::Response {
                id,
                ok,
                payload,
                error,
            } => {
                let slot = self.pending.lock().unwrap().remove(&id);
                match slot {
                    Some(tx) => {
                        let result = if ok {
                            Ok(payload.unwrap_or(Value::Null))
                        } else {
                            Err(error.unwrap_or_else(|| ErrorShape {
                                code: "unknown".into(),
                                message: "gateway reported failure without detail".into(),
                            }))
                        };
                        let _ = tx.send(result);
                    }
                    None => debug!(id = %id, "response for unknown request id, dropping"),
                }
            }
            Frame::Event {
                event,
                payload,
                seq,
            } => {
                if let Some(seq) = seq {
                    debug!(event = %event, seq, "gateway event");
                }
                let payload = payload.unwrap_or(Value::Null);
                let mut subs = self.subs.lock().unwrap();
                if event == "chat" {
                    match serde_json::from_value::<ChatEvent>(payload.clone()) {
                        Ok(chat) => subs.chat.retain(|tx| tx.send(chat.clone()).is_ok()),
                        Err(e) => warn!(error = %e, "chat event with unexpected shape"),
                    }
                }
                let drained = match subs.raw.get_mut(&event) {
                    Some(list) => {
                        list.retain(|tx| tx.send(payload.clone()).is_ok());
                        list.is_empty()
                    }
                    None => false,
                };
                if drained {
                    subs.raw.remove(&event);
                }
            }
            Frame::Request { .. } => debug!("ignoring request frame from gateway"),
        }
    }

    fn shut_down(&self, reason: &str) {
        for (_, tx) in self.pending.lock().unwrap().drain() {
            let _ = tx.send(Err(ErrorShape {
                code: "transport".into(),
                message: reason.into(),
            }));
        }
        // Dropping the senders closes every subscription stream.
        let mut subs = self.subs.lock().unwrap();
        subs.chat.clear();
        subs.raw.clear();
    }
}

/// WebSocket client for the gateway session protocol.
///
/// Writes funnel through a dedicated send lane; a single receive loop routes
/// response frames to pending request slots and event frames to subscribers.
/// Subscriber channels are unbounded so dispatch never blocks the loop.
/// Reconnect is out of scope: transport loss fails pending requests and
/// closes subscriptions, and callers surface that as node errors.
pub struct GatewayClient {
    send_tx: mpsc::UnboundedSender<WsMessage>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    request_timeout: Duration,
    hello: ServerHello,
}

impl GatewayClient {
    /// Open the transport, perform the challenge–response handshake, and
    /// return a ready client.
    pub async fn connect(config: &GatewayConfig) -> Result<Arc<Self>> {
        let (ws, _) = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            tokio_tungstenite::connect_async(config.url.as_str()),
        )
        .await
        .map_err(|_| ClawdiniError::Timeout {
            what: "gateway transport open".into(),
            secs: config.connect_timeout_secs,
        })?
        .map_err(|e| ClawdiniError::Transport(format!("connect {}: {e}", config.url)))?;

        let (mut ws_tx, mut ws_rx) = ws.split();

        // Dedicated send lane: every frame goes through one writer task.
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<WsMessage>();
        tokio::spawn(async move {
            while let Some(msg) = send_rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let shared = Arc::new(Shared::default());

        // Register for the challenge before the receive loop starts, so a
        // push arriving right after the socket opens cannot be missed.
        let (challenge_tx, mut challenge_rx) = mpsc::unbounded_channel();
        shared
            .subs
            .lock()
            .unwrap()
            .raw
            .entry("connect.challenge".to_string())
            .or_default()
            .push(challenge_tx);

        let recv_shared = shared.clone();
        let pong_tx = send_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "gateway read error");
                        break;
                    }
                };
                match msg {
                    WsMessage::Text(text) => recv_shared.route_frame(&text),
                    WsMessage::Ping(data) => {
                        let _ = pong_tx.send(WsMessage::Pong(data));
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            recv_shared.shut_down("gateway connection closed");
        });

        let mut client = Self {
            send_tx,
            shared,
            next_id: AtomicU64::new(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            hello: ServerHello::default(),
        };

        let challenge = tokio::time::timeout(
            Duration::from_millis(config.challenge_wait_ms),
            challenge_rx.recv(),
        )
        .await
        .ok()
        .flatten();

        client.hello = client.handshake(config, challenge).await?;
        info!(
            version = client.hello.version.as_deref().unwrap_or("unknown"),
            conn_id = client.hello.conn_id.as_deref().unwrap_or("-"),
            "gateway handshake complete"
        );
        Ok(Arc::new(client))
    }

    pub fn hello(&self) -> &ServerHello {
        &self.hello
    }

    /// Subscribe to a raw gateway event by name. The subscription ends when
    /// the receiver is dropped.
    pub fn subscribe_raw(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .subs
            .lock()
            .unwrap()
            .raw
            .entry(event.to_string())
            .or_default()
            .push(tx);
        rx
    }

    async fn handshake(
        &self,
        config: &GatewayConfig,
        challenge: Option<Value>,
    ) -> Result<ServerHello> {
        let identity = DeviceIdentity::load_or_generate(&config.identity_file())?;

        let nonce = challenge
            .as_ref()
            .and_then(|c| c.get("nonce"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let signed_at = chrono::Utc::now().timestamp_millis();
        let token = config.token.clone().unwrap_or_default();
        let version = if nonce.is_some() { "v2" } else { "v1" };
        let payload = signed_payload(
            version,
            identity.device_id(),
            &config.client_id,
            &config.client_mode,
            &config.role,
            &config.scopes,
            signed_at,
            &token,
            nonce.as_deref(),
        );

        let mut device = json!({
            "id": identity.device_id(),
            "publicKey": identity.public_key_b64(),
            "signature": identity.sign_b64(&payload),
            "signedAt": signed_at,
        });
        if let Some(nonce) = &nonce {
            device["nonce"] = json!(nonce);
        }

        let mut params = json!({
            "minProtocol": PROTOCOL_VERSION,
            "maxProtocol": PROTOCOL_VERSION,
            "client": {
                "id": config.client_id,
                "mode": config.client_mode,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "role": config.role,
            "scopes": config.scopes,
            "device": device,
        });
        if let Some(token) = &config.token {
            params["auth"] = json!({ "token": token });
        }

        let hello_timeout = Duration::from_secs(config.connect_timeout_secs);
        let payload = self
            .do_request("connect", params, hello_timeout)
            .await
            .map_err(|e| match e {
                ClawdiniError::Rpc { code, message } => {
                    ClawdiniError::Auth(format!("{code}: {message}"))
                }
                ClawdiniError::Timeout { .. } => {
                    ClawdiniError::Auth("hello-ok not received".into())
                }
                other => other,
            })?;

        if payload.get("type").and_then(Value::as_str) != Some("hello-ok") {
            return Err(ClawdiniError::Auth("unexpected connect response".into()));
        }
        let server = payload.get("server").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(server).unwrap_or_default())
    }

    async fn do_request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(id.clone(), tx);

        let frame = Frame::Request {
            id: id.clone(),
            method: method.to_string(),
            params: if params.is_null() { None } else { Some(params) },
        };
        if self.send_tx.send(WsMessage::Text(frame.encode().into())).is_err() {
            self.shared.pending.lock().unwrap().remove(&id);
            return Err(ClawdiniError::Transport("gateway connection closed".into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(err))) if err.code == "transport" => {
                Err(ClawdiniError::Transport(err.message))
            }
            Ok(Ok(Err(err))) => Err(ClawdiniError::Rpc {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => Err(ClawdiniError::Transport("gateway connection closed".into())),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&id);
                Err(ClawdiniError::Timeout {
                    what: format!("rpc {method}"),
                    secs: timeout.as_secs(),
                })
            }
        }
    }
}

impl Gateway for GatewayClient {
    fn request(&self, method: &str, params: Value) -> BoxFuture<'_, Result<Value>> {
        let method = method.to_string();
        Box::pin(async move { self.do_request(&method, params, self.request_timeout).await })
    }

    fn subscribe_chat(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subs.lock().unwrap().chat.push(tx);
        rx
    }
}

/// Build the pipe-joined payload signed during the handshake. `nonce` is
/// appended only for v2 (challenge present).
#[allow(clippy::too_many_arguments)]
fn signed_payload(
    version: &str,
    device_id: &str,
    client_id: &str,
    client_mode: &str,
    role: &str,
    scopes: &[String],
    signed_at_ms: i64,
    token: &str,
    nonce: Option<&str>,
) -> String {
    let mut parts = vec![
        version.to_string(),
        device_id.to_string(),
        client_id.to_string(),
        client_mode.to_string(),
        role.to_string(),
        scopes.join(","),
        signed_at_ms.to_string(),
        token.to_string(),
    ];
    if let Some(nonce) = nonce {
        parts.push(nonce.to_string());
    }
    parts.join("|")
}
