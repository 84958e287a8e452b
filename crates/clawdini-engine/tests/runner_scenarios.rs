use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use clawdini_core::config::EngineConfig;
use clawdini_core::error::{ClawdiniError, Result};
use clawdini_core::event::RunEvent;
use clawdini_core::graph::{Edge, Graph, GraphNode, NodeKind};
use clawdini_core::traits::Gateway;
use clawdini_core::types::{ChatEvent, ChatState};
use clawdini_engine::RunRegistry;

/// How the fake gateway answers `chat.send`.
enum FakeMode {
    /// Stream the message back: two cumulative deltas, then final.
    Echo,
    /// Stream a fixed sequence of cumulative texts, then final on the last.
    Script(Vec<&'static str>),
    /// Never answer; only `chat.abort` releases the waiter.
    Silent,
}

struct FakeGateway {
    mode: FakeMode,
    subs: Mutex<Vec<mpsc::UnboundedSender<ChatEvent>>>,
    aborts: Mutex<Vec<(String, String)>>,
    counter: AtomicU64,
}

impl FakeGateway {
    fn new(mode: FakeMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            subs: Mutex::new(Vec::new()),
            aborts: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        })
    }

    fn emit(&self, event: ChatEvent) {
        self.subs
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn chat_event(session_key: &str, run_id: &str, state: ChatState, text: Option<&str>) -> ChatEvent {
        ChatEvent {
            run_id: run_id.to_string(),
            session_key: session_key.to_string(),
            state,
            message: text.map(|t| json!({ "content": t })),
            error_message: None,
        }
    }
}

impl Gateway for FakeGateway {
    fn request(&self, method: &str, params: Value) -> BoxFuture<'_, Result<Value>> {
        let method = method.to_string();
        Box::pin(async move {
            match method.as_str() {
                "sessions.reset" | "sessions.patch" => Ok(json!({ "ok": true })),
                "chat.send" => {
                    let session_key = params["sessionKey"].as_str().unwrap_or_default().to_string();
                    let message = params["message"].as_str().unwrap_or_default().to_string();
                    let n = self.counter.fetch_add(1, Ordering::SeqCst);
                    let run_id = format!("chat-{n}");
                    match &self.mode {
                        FakeMode::Echo => {
                            let mid = message.len() / 2;
                            self.emit(Self::chat_event(
                                &session_key,
                                &run_id,
                                ChatState::Delta,
                                Some(&message[..mid]),
                            ));
                            self.emit(Self::chat_event(
                                &session_key,
                                &run_id,
                                ChatState::Delta,
                                Some(&message),
                            ));
                            self.emit(Self::chat_event(
                                &session_key,
                                &run_id,
                                ChatState::Final,
                                Some(&message),
                            ));
                        }
                        FakeMode::Script(texts) => {
                            for text in texts {
                                self.emit(Self::chat_event(
                                    &session_key,
                                    &run_id,
                                    ChatState::Delta,
                                    Some(text),
                                ));
                            }
                            if let Some(last) = texts.last() {
                                self.emit(Self::chat_event(
                                    &session_key,
                                    &run_id,
                                    ChatState::Final,
                                    Some(last),
                                ));
                            }
                        }
                        FakeMode::Silent => {}
                    }
                    Ok(json!({ "runId": run_id }))
                }
                "chat.abort" => {
                    let session_key = params["sessionKey"].as_str().unwrap_or_default().to_string();
                    let run_id = params["runId"].as_str().unwrap_or_default().to_string();
                    self.aborts
                        .lock()
                        .unwrap()
                        .push((session_key.clone(), run_id.clone()));
                    self.emit(Self::chat_event(&session_key, &run_id, ChatState::Aborted, None));
                    Ok(json!({ "ok": true }))
                }
                "tool.echo" => Ok(params),
                other => Err(ClawdiniError::Rpc {
                    code: "unknown method".into(),
                    message: other.to_string(),
                }),
            }
        })
    }

    fn subscribe_chat(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.lock().unwrap().push(tx);
        rx
    }
}

fn node(id: &str, kind: NodeKind, config: Value) -> GraphNode {
    GraphNode {
        id: id.into(),
        kind,
        label: None,
        config,
    }
}

fn edge(id: &str, source: &str, target: &str) -> Edge {
    Edge {
        id: id.into(),
        source: source.into(),
        target: target.into(),
        source_handle: None,
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        chat_timeout_secs: 5,
        settle_delay_ms: 0,
        event_buffer: 500,
        grace_secs: 30,
    }
}

/// Drain the run's stream until the terminal event for `run_id` (foreach
/// children share the sink, so only the parent's terminal event stops
/// collection).
async fn collect(
    rx: &mut mpsc::UnboundedReceiver<RunEvent>,
    run_id: &str,
) -> Vec<RunEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("run did not terminate in time")
            .expect("event stream closed early");
        let done = event.is_terminal()
            && matches!(
                &event,
                RunEvent::RunCompleted { run_id: id }
                | RunEvent::RunError { run_id: id, .. }
                | RunEvent::RunCancelled { run_id: id } if id == run_id
            );
        events.push(event);
        if done {
            break;
        }
    }
    events
}

fn node_final<'a>(events: &'a [RunEvent], node_id: &str) -> Vec<&'a RunEvent> {
    events
        .iter()
        .filter(|e| matches!(e, RunEvent::NodeFinal { node_id: id, .. } if id == node_id))
        .collect()
}

#[tokio::test]
async fn test_pass_through() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "hello"})),
            node("out", NodeKind::Output, Value::Null),
        ],
        edges: vec![edge("e1", "in", "out")],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    let finals = node_final(&events, "out");
    assert_eq!(finals.len(), 1);
    assert!(matches!(finals[0], RunEvent::NodeFinal { data, .. } if data.text == "hello"));
    assert!(matches!(events.last().unwrap(), RunEvent::RunCompleted { .. }));
}

#[tokio::test]
async fn test_fan_in_concat() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("a", NodeKind::Input, json!({"prompt": "A"})),
            node("b", NodeKind::Input, json!({"prompt": "B"})),
            node("m", NodeKind::Merge, json!({"mode": "concat"})),
            node("out", NodeKind::Output, Value::Null),
        ],
        edges: vec![
            edge("e1", "a", "m"),
            edge("e2", "b", "m"),
            edge("e3", "m", "out"),
        ],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    let finals = node_final(&events, "out");
    assert_eq!(finals.len(), 1);
    let RunEvent::NodeFinal { data, .. } = finals[0] else { unreachable!() };
    assert_eq!(data.text, "=== Source 1 ===\nA\n\n=== Source 2 ===\nB\n");
}

#[tokio::test]
async fn test_switch_halt_cascades() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "error: boom"})),
            node(
                "sw",
                NodeKind::Switch,
                json!({"rules": [{"id": "r1", "mode": "regex", "condition": ".*success.*"}]}),
            ),
            node("out", NodeKind::Output, Value::Null),
        ],
        edges: vec![
            edge("e1", "in", "sw"),
            Edge {
                id: "e2".into(),
                source: "sw".into(),
                target: "out".into(),
                source_handle: Some("r1".into()),
            },
        ],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    let finals = node_final(&events, "sw");
    assert!(
        matches!(finals[0], RunEvent::NodeFinal { data, .. } if data.text == "Halted (No conditions matched)")
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::NodeAborted { node_id } if node_id == "out")));
    assert!(node_final(&events, "out").is_empty());
    assert!(matches!(events.last().unwrap(), RunEvent::RunCompleted { .. }));
}

#[tokio::test]
async fn test_switch_routes_matching_branch() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "all success here"})),
            node(
                "sw",
                NodeKind::Switch,
                json!({"rules": [
                    {"id": "ok", "mode": "regex", "condition": "success"},
                    {"id": "bad", "mode": "regex", "condition": "failure"},
                ]}),
            ),
            node("win", NodeKind::Output, Value::Null),
            node("lose", NodeKind::Output, Value::Null),
        ],
        edges: vec![
            edge("e1", "in", "sw"),
            Edge {
                id: "e2".into(),
                source: "sw".into(),
                target: "win".into(),
                source_handle: Some("ok".into()),
            },
            Edge {
                id: "e3".into(),
                source: "sw".into(),
                target: "lose".into(),
                source_handle: Some("bad".into()),
            },
        ],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    assert!(
        matches!(node_final(&events, "sw")[0], RunEvent::NodeFinal { data, .. } if data.text == "Flow routed to 1 branches")
    );
    assert_eq!(node_final(&events, "win").len(), 1);
    assert!(node_final(&events, "lose").is_empty());
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::NodeAborted { node_id } if node_id == "lose")));
}

#[tokio::test]
async fn test_cumulative_deltas_become_suffixes() {
    let gateway = FakeGateway::new(FakeMode::Script(vec!["He", "Hello", "Hello world"]));
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "speak"})),
            node("ag", NodeKind::Agent, json!({"agentId": "main"})),
        ],
        edges: vec![edge("e1", "in", "ag")],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::NodeDelta { node_id, data } if node_id == "ag" => Some(data.text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["He", "llo", " world"]);

    let finals = node_final(&events, "ag");
    let RunEvent::NodeFinal { data, .. } = finals[0] else { unreachable!() };
    assert_eq!(data.text, "Hello world");
    // The concatenated deltas equal the final text.
    assert_eq!(deltas.concat(), data.text);
    assert_eq!(
        data.meta.session_key.as_deref(),
        Some(format!("agent:main:clawdini:{run_id}:ag").as_str())
    );
}

#[tokio::test]
async fn test_foreach_fans_out_children() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node(
                "in",
                NodeKind::Input,
                json!({"prompt": "[{\"x\":1},{\"x\":2},{\"x\":3}]"}),
            ),
            node("fan", NodeKind::Foreach, json!({"arrayPath": ""})),
            node("ag", NodeKind::Agent, json!({"agentId": "main"})),
            node("out", NodeKind::Output, Value::Null),
        ],
        edges: vec![
            edge("e1", "in", "fan"),
            edge("e2", "fan", "ag"),
            edge("e3", "ag", "out"),
        ],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    // Three child runs completed, plus the parent.
    let completed = events
        .iter()
        .filter(|e| matches!(e, RunEvent::RunCompleted { .. }))
        .count();
    assert_eq!(completed, 4);

    let finals = node_final(&events, "fan");
    assert!(
        matches!(finals[0], RunEvent::NodeFinal { data, .. } if data.text == "Completed 3 parallel sub-executions.")
    );

    // Each child echoed its element through agent -> output.
    let mut outputs: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::NodeFinal { node_id, data } if node_id == "out" => Some(data.text.clone()),
            _ => None,
        })
        .collect();
    outputs.sort();
    assert_eq!(outputs, vec!["{\"x\":1}", "{\"x\":2}", "{\"x\":3}"]);

    // The parent's own copies were routed away.
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::NodeAborted { node_id } if node_id == "ag")));
}

#[tokio::test]
async fn test_cancellation_aborts_inflight_chat() {
    let gateway = FakeGateway::new(FakeMode::Silent);
    let registry = RunRegistry::new(gateway.clone(), test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "slow work"})),
            node("ag", NodeKind::Agent, json!({"agentId": "main"})),
            node("out", NodeKind::Output, Value::Null),
        ],
        edges: vec![edge("e1", "in", "ag"), edge("e2", "ag", "out")],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(registry.cancel(&run_id).await);

    let events = collect(&mut rx, &run_id).await;

    // chat.abort went out for the agent's session.
    let aborts = gateway.aborts.lock().unwrap();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].0, format!("agent:main:clawdini:{run_id}:ag"));

    // The run cancelled exactly once; the aborted node never finalized and
    // the output level never launched.
    let cancelled = events
        .iter()
        .filter(|e| matches!(e, RunEvent::RunCancelled { .. }))
        .count();
    assert_eq!(cancelled, 1);
    assert!(matches!(events.last().unwrap(), RunEvent::RunCancelled { .. }));
    assert!(node_final(&events, "ag").is_empty());
    assert!(!events
        .iter()
        .any(|e| matches!(e, RunEvent::NodeStarted { node_id, .. } if node_id == "out")));
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::NodeError { node_id, .. } if node_id == "ag")));
}

#[tokio::test]
async fn test_judge_produces_decision() {
    let gateway = FakeGateway::new(FakeMode::Script(vec![
        r#"{"status": "done", "score": 91, "reasons": ["solid"], "missing": [], "nextActionHint": "ship it", "recommendedBranch": "approve"}"#,
    ]));
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "the deliverable"})),
            node("jd", NodeKind::Judge, json!({"criteria": "is it complete?"})),
        ],
        edges: vec![edge("e1", "in", "jd")],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    let finals = node_final(&events, "jd");
    let RunEvent::NodeFinal { data, .. } = finals[0] else { unreachable!() };
    let decision = data.json.as_ref().expect("decision json");
    assert_eq!(decision["status"], json!("done"));
    assert_eq!(decision["score"], json!(91));
    assert_eq!(decision["recommendedBranch"], json!("approve"));
}

#[tokio::test]
async fn test_invoke_calls_gateway_command() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "say \"hi\""})),
            node(
                "iv",
                NodeKind::Invoke,
                json!({"commandName": "tool.echo", "payloadTemplate": "{\"query\": \"{INPUT}\"}"}),
            ),
        ],
        edges: vec![edge("e1", "in", "iv")],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    let finals = node_final(&events, "iv");
    let RunEvent::NodeFinal { data, .. } = finals[0] else { unreachable!() };
    assert_eq!(data.json.as_ref().unwrap()["query"], json!("say \"hi\""));
}

#[tokio::test]
async fn test_state_feeds_template_scope() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "remembered"})),
            node("st", NodeKind::State, json!({"namespace": "memo", "mode": "replace"})),
            node(
                "tp",
                NodeKind::Template,
                json!({"template": "state says: {{state.memo}}", "format": "text"}),
            ),
            node("out", NodeKind::Output, Value::Null),
        ],
        edges: vec![
            edge("e1", "in", "st"),
            edge("e2", "st", "tp"),
            edge("e3", "tp", "out"),
        ],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    let finals = node_final(&events, "out");
    let RunEvent::NodeFinal { data, .. } = finals[0] else { unreachable!() };
    assert_eq!(data.text, "state says: remembered");
}

#[tokio::test]
async fn test_node_error_does_not_abort_siblings() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    // One invoke node with an unknown command fails; its sibling input still
    // reaches the output.
    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("in", NodeKind::Input, json!({"prompt": "fine"})),
            node(
                "iv",
                NodeKind::Invoke,
                json!({"commandName": "no.such.command", "payloadTemplate": "{}"}),
            ),
            node("out", NodeKind::Output, Value::Null),
        ],
        edges: vec![edge("e1", "in", "out"), edge("e2", "iv", "out")],
    };

    let run_id = registry.start(graph, None).unwrap();
    let mut rx = registry.subscribe(&run_id).unwrap();
    let events = collect(&mut rx, &run_id).await;

    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::NodeError { node_id, .. } if node_id == "iv")));
    let finals = node_final(&events, "out");
    let RunEvent::NodeFinal { data, .. } = finals[0] else { unreachable!() };
    // Only the surviving upstream contributed.
    assert_eq!(data.text, "fine");
    assert!(matches!(events.last().unwrap(), RunEvent::RunCompleted { .. }));
}

#[tokio::test]
async fn test_cyclic_graph_rejected_at_submission() {
    let gateway = FakeGateway::new(FakeMode::Echo);
    let registry = RunRegistry::new(gateway, test_config());

    let graph = Graph {
        id: "g".into(),
        nodes: vec![
            node("a", NodeKind::Input, Value::Null),
            node("b", NodeKind::Output, Value::Null),
        ],
        edges: vec![edge("e1", "a", "b"), edge("e2", "b", "a")],
    };

    assert!(registry.start(graph, None).is_err());
}
