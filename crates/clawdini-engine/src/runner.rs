use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use clawdini_core::config::EngineConfig;
use clawdini_core::event::RunEvent;
use clawdini_core::graph::{Graph, GraphNode};
use clawdini_core::traits::Gateway;
use clawdini_core::types::NodePayload;

use crate::levels::compute_levels;
use crate::nodes;
use crate::registry::EventSink;
use crate::state::StateStore;

/// A payload arriving over one enabled in-edge, tagged with its producer.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub node_id: String,
    pub label: Option<String>,
    pub payload: NodePayload,
}

/// What an executor hands back to the scheduler: the node's payload plus any
/// edges it decided to disable (switch routing, foreach fan-out).
#[derive(Debug)]
pub struct NodeOutcome {
    pub payload: NodePayload,
    pub disable_edges: Vec<String>,
}

impl NodeOutcome {
    pub fn completed(payload: NodePayload) -> Self {
        Self {
            payload,
            disable_edges: Vec::new(),
        }
    }
}

/// A gateway chat operation in flight for a node, kept for cancellation.
#[derive(Debug, Clone)]
pub struct ChatOp {
    pub chat_run_id: String,
    pub session_key: String,
}

#[derive(Debug)]
struct NodeRecord {
    payload: NodePayload,
    completed: bool,
}

/// Executes one graph: peels levels, dispatches each level's nodes
/// concurrently, tracks outputs and disabled edges, and streams run events
/// into the sink. The outputs map and disabled set are written only from the
/// scheduling task; executors return their results.
pub struct GraphRunner {
    run_id: String,
    graph: Arc<Graph>,
    gateway: Arc<dyn Gateway>,
    sink: EventSink,
    config: EngineConfig,
    state: StateStore,
    inflight: Mutex<HashMap<String, ChatOp>>,
    cancel: CancellationToken,
    global_input: Option<String>,
    settle_delay: Duration,
}

impl GraphRunner {
    pub fn new(
        run_id: String,
        graph: Arc<Graph>,
        gateway: Arc<dyn Gateway>,
        sink: EventSink,
        config: EngineConfig,
        global_input: Option<String>,
    ) -> Arc<Self> {
        let settle_delay = Duration::from_millis(config.settle_delay_ms);
        Arc::new(Self {
            run_id,
            graph,
            gateway,
            sink,
            config,
            state: StateStore::new(),
            inflight: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            global_input,
            settle_delay,
        })
    }

    /// Spawn a child runner over `graph` sharing this runner's gateway and
    /// event sink. The child gets its own run id, state store, and output
    /// map; cancellation propagates from the parent. Children skip the
    /// settle delay since their subscribers are already attached.
    pub fn child(&self, graph: Graph, global_input: String) -> Arc<Self> {
        Arc::new(Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            graph: Arc::new(graph),
            gateway: self.gateway.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
            state: StateStore::new(),
            inflight: Mutex::new(HashMap::new()),
            cancel: self.cancel.child_token(),
            global_input: Some(global_input),
            settle_delay: Duration::ZERO,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn register_inflight(&self, node_id: &str, op: ChatOp) {
        self.inflight
            .lock()
            .unwrap()
            .insert(node_id.to_string(), op);
    }

    pub(crate) fn clear_inflight(&self, node_id: &str) {
        self.inflight.lock().unwrap().remove(node_id);
    }

    /// Stop launching new levels and abort every in-flight gateway chat.
    /// In-flight executors observe the server-side abort through their chat
    /// event stream; the run loop emits `runCancelled` once they return.
    pub async fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!(run_id = %self.run_id, "cancelling run");
        self.cancel.cancel();

        let ops: Vec<ChatOp> = self
            .inflight
            .lock()
            .unwrap()
            .drain()
            .map(|(_, op)| op)
            .collect();
        for op in ops {
            if let Err(e) = self
                .gateway
                .chat_abort(&op.session_key, Some(&op.chat_run_id))
                .await
            {
                debug!(error = %e, session_key = %op.session_key, "chat.abort failed");
            }
        }
    }

    pub async fn run(self: &Arc<Self>) {
        if !self.settle_delay.is_zero() {
            // Give interactive subscribers a moment to attach.
            tokio::time::sleep(self.settle_delay).await;
        }
        self.sink.emit(RunEvent::RunStarted {
            run_id: self.run_id.clone(),
        });

        let levels = match compute_levels(&self.graph) {
            Ok(levels) => levels,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "graph rejected");
                self.sink.emit(RunEvent::RunError {
                    run_id: self.run_id.clone(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let mut records: HashMap<String, NodeRecord> = HashMap::new();
        let mut disabled: HashSet<String> = HashSet::new();

        for level in levels {
            if self.cancel.is_cancelled() {
                break;
            }

            let mut dispatched = Vec::new();
            for node_id in level {
                let Some(node) = self.graph.node(&node_id) else {
                    continue;
                };

                let in_edges: Vec<_> = self.graph.incoming(&node_id).collect();
                if !in_edges.is_empty() && in_edges.iter().all(|e| disabled.contains(&e.id)) {
                    // Every path into this node was routed away: halt it and
                    // cascade downstream.
                    debug!(run_id = %self.run_id, node_id = %node_id, "all in-edges disabled, halting node");
                    self.sink.emit(RunEvent::NodeAborted {
                        node_id: node_id.clone(),
                    });
                    records.insert(
                        node_id.clone(),
                        NodeRecord {
                            payload: NodePayload::text("Halted (Skipped)"),
                            completed: true,
                        },
                    );
                    for edge in self.graph.outgoing(&node_id) {
                        disabled.insert(edge.id.clone());
                    }
                    continue;
                }

                let mut inputs: Vec<Incoming> = in_edges
                    .iter()
                    .filter(|e| !disabled.contains(&e.id))
                    .filter_map(|e| {
                        records
                            .get(&e.source)
                            .filter(|r| r.completed)
                            .map(|r| Incoming {
                                node_id: e.source.clone(),
                                label: self
                                    .graph
                                    .node(&e.source)
                                    .and_then(|n| n.label.clone()),
                                payload: r.payload.clone(),
                            })
                    })
                    .collect();
                if in_edges.is_empty() {
                    if let Some(input) = &self.global_input {
                        inputs.push(Incoming {
                            node_id: String::new(),
                            label: None,
                            payload: NodePayload::text(input.clone()),
                        });
                    }
                }

                self.sink.emit(RunEvent::NodeStarted {
                    node_id: node_id.clone(),
                    data: NodePayload::default(),
                });

                let runner = self.clone();
                let node: GraphNode = node.clone();
                dispatched.push(async move {
                    let started = Instant::now();
                    let result = nodes::execute(&runner, &node, inputs).await;
                    (node.id, started.elapsed(), result)
                });
            }

            let results = futures::future::join_all(dispatched).await;
            for (node_id, elapsed, result) in results {
                match result {
                    Ok(outcome) => {
                        debug!(
                            run_id = %self.run_id,
                            node_id = %node_id,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "node completed"
                        );
                        for edge_id in &outcome.disable_edges {
                            disabled.insert(edge_id.clone());
                        }
                        records.insert(
                            node_id.clone(),
                            NodeRecord {
                                payload: outcome.payload.clone(),
                                completed: true,
                            },
                        );
                        self.sink.emit(RunEvent::NodeFinal {
                            node_id,
                            data: outcome.payload,
                        });
                    }
                    Err(e) => {
                        // A failed node does not abort the run; downstream
                        // consumers just see no payload on this edge.
                        warn!(run_id = %self.run_id, node_id = %node_id, error = %e, "node failed");
                        records.insert(
                            node_id.clone(),
                            NodeRecord {
                                payload: NodePayload::default(),
                                completed: false,
                            },
                        );
                        self.sink.emit(RunEvent::NodeError {
                            node_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            self.sink.emit(RunEvent::RunCancelled {
                run_id: self.run_id.clone(),
            });
        } else {
            self.sink.emit(RunEvent::RunCompleted {
                run_id: self.run_id.clone(),
            });
        }
    }
}
