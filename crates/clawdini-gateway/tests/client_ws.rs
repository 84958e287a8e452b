use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use clawdini_core::config::GatewayConfig;
use clawdini_core::error::ClawdiniError;
use clawdini_core::traits::Gateway;
use clawdini_gateway::GatewayClient;

/// Minimal in-process gateway: pushes an optional challenge, answers
/// `connect` with hello-ok, echoes `echo.back`, rejects `deny.me`, and emits
/// a chat event after every echo.
async fn spawn_gateway(with_challenge: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        if with_challenge {
            let challenge = json!({
                "type": "event",
                "event": "connect.challenge",
                "payload": {"nonce": "n0nce", "ts": 1},
            });
            ws.send(Message::Text(challenge.to_string().into()))
                .await
                .unwrap();
        }

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let frame: Value = serde_json::from_str(&text).unwrap();
            let id = frame["id"].clone();
            match frame["method"].as_str() {
                Some("connect") => {
                    let device = &frame["params"]["device"];
                    assert!(device["id"].is_string());
                    assert!(device["publicKey"].is_string());
                    assert!(device["signature"].is_string());
                    if with_challenge {
                        assert_eq!(device["nonce"], json!("n0nce"));
                    }
                    assert_eq!(frame["params"]["minProtocol"], json!(3));
                    assert_eq!(frame["params"]["maxProtocol"], json!(3));

                    let hello = json!({
                        "type": "res",
                        "id": id,
                        "ok": true,
                        "payload": {
                            "type": "hello-ok",
                            "server": {
                                "version": "1.2.3",
                                "connId": "conn-1",
                                "features": {"methods": ["chat.send"], "events": ["chat"]},
                            },
                        },
                    });
                    ws.send(Message::Text(hello.to_string().into())).await.unwrap();
                }
                Some("echo.back") => {
                    let res = json!({
                        "type": "res",
                        "id": id,
                        "ok": true,
                        "payload": frame["params"],
                    });
                    ws.send(Message::Text(res.to_string().into())).await.unwrap();

                    let chat = json!({
                        "type": "event",
                        "event": "chat",
                        "payload": {
                            "runId": "chat-9",
                            "sessionKey": "agent:main:clawdini:r:n",
                            "state": "final",
                            "message": {"content": "hi from gateway"},
                        },
                        "seq": 1,
                    });
                    ws.send(Message::Text(chat.to_string().into())).await.unwrap();
                }
                Some("deny.me") => {
                    let res = json!({
                        "type": "res",
                        "id": id,
                        "ok": false,
                        "error": {"code": "missing scope", "message": "operator.write required"},
                    });
                    ws.send(Message::Text(res.to_string().into())).await.unwrap();
                }
                _ => {}
            }
        }
    });

    format!("ws://{addr}")
}

fn test_config(url: String, dir: &tempfile::TempDir) -> GatewayConfig {
    GatewayConfig {
        url,
        identity_path: Some(dir.path().join("identity.json").display().to_string()),
        challenge_wait_ms: 500,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_handshake_with_challenge_then_rpc_and_events() {
    let url = spawn_gateway(true).await;
    let dir = tempfile::tempdir().unwrap();
    let client = GatewayClient::connect(&test_config(url, &dir)).await.unwrap();

    assert_eq!(client.hello().version.as_deref(), Some("1.2.3"));
    assert_eq!(client.hello().conn_id.as_deref(), Some("conn-1"));

    let mut chat = client.subscribe_chat();

    let payload = client.request("echo.back", json!({"x": 1})).await.unwrap();
    assert_eq!(payload["x"], json!(1));

    let event = tokio::time::timeout(Duration::from_secs(2), chat.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.session_key, "agent:main:clawdini:r:n");
    assert_eq!(event.text(), "hi from gateway");
}

#[tokio::test]
async fn test_handshake_without_challenge() {
    let url = spawn_gateway(false).await;
    let dir = tempfile::tempdir().unwrap();
    let client = GatewayClient::connect(&test_config(url, &dir)).await.unwrap();
    assert_eq!(client.hello().features.methods, vec!["chat.send"]);
}

#[tokio::test]
async fn test_rpc_error_surfaces_code_verbatim() {
    let url = spawn_gateway(false).await;
    let dir = tempfile::tempdir().unwrap();
    let client = GatewayClient::connect(&test_config(url, &dir)).await.unwrap();

    let err = client.request("deny.me", Value::Null).await.unwrap_err();
    match err {
        ClawdiniError::Rpc { code, message } => {
            assert_eq!(code, "missing scope");
            assert_eq!(message, "operator.write required");
        }
        other => panic!("expected rpc error, got {other}"),
    }
}
