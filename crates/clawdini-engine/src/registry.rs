use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use clawdini_core::config::EngineConfig;
use clawdini_core::error::Result;
use clawdini_core::event::RunEvent;
use clawdini_core::graph::Graph;
use clawdini_core::traits::Gateway;

use crate::levels::compute_levels;
use crate::runner::GraphRunner;

/// Per-run event channel: a bounded replay buffer plus live subscribers.
/// A subscriber attaching mid-run first receives the buffered suffix, then
/// live events, with no gap and no duplicates.
pub struct RunChannel {
    inner: Mutex<ChannelInner>,
    capacity: usize,
}

struct ChannelInner {
    buffer: VecDeque<RunEvent>,
    subscribers: Vec<mpsc::UnboundedSender<RunEvent>>,
}

impl RunChannel {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ChannelInner {
                buffer: VecDeque::new(),
                subscribers: Vec::new(),
            }),
            capacity,
        })
    }

    pub fn emit(&self, event: RunEvent) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        inner.buffer.push_back(event);
        while inner.buffer.len() > self.capacity {
            inner.buffer.pop_front();
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        for event in &inner.buffer {
            let _ = tx.send(event.clone());
        }
        inner.subscribers.push(tx);
        rx
    }
}

/// Clone-able handle a runner (and its foreach children) emits through.
/// Safe for concurrent emit.
#[derive(Clone)]
pub struct EventSink {
    channel: Arc<RunChannel>,
}

impl EventSink {
    pub fn new(channel: Arc<RunChannel>) -> Self {
        Self { channel }
    }

    pub fn emit(&self, event: RunEvent) {
        self.channel.emit(event);
    }
}

struct RunEntry {
    runner: Arc<GraphRunner>,
    channel: Arc<RunChannel>,
}

/// Maps run ids to runners and multiplexes their event streams. Runs stay
/// subscribable for a grace window after termination so late observers can
/// drain the buffer.
pub struct RunRegistry {
    gateway: Arc<dyn Gateway>,
    config: EngineConfig,
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl RunRegistry {
    pub fn new(gateway: Arc<dyn Gateway>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            config,
            runs: Mutex::new(HashMap::new()),
        })
    }

    /// Mint a run id, spawn a runner over `graph`, and return immediately.
    /// Cyclic graphs are rejected here, before anything executes.
    pub fn start(self: &Arc<Self>, graph: Graph, input: Option<String>) -> Result<String> {
        compute_levels(&graph)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let channel = RunChannel::new(self.config.event_buffer);
        let runner = GraphRunner::new(
            run_id.clone(),
            Arc::new(graph),
            self.gateway.clone(),
            EventSink::new(channel.clone()),
            self.config.clone(),
            input,
        );

        self.runs.lock().unwrap().insert(
            run_id.clone(),
            RunEntry {
                runner: runner.clone(),
                channel,
            },
        );
        info!(run_id = %run_id, "run submitted");

        let registry = self.clone();
        let spawned_id = run_id.clone();
        tokio::spawn(async move {
            runner.run().await;
            tokio::time::sleep(Duration::from_secs(registry.config.grace_secs)).await;
            registry.runs.lock().unwrap().remove(&spawned_id);
            debug!(run_id = %spawned_id, "run evicted after grace window");
        });

        Ok(run_id)
    }

    /// Attach to a run's event stream: buffered events replay first, then
    /// live events follow.
    pub fn subscribe(&self, run_id: &str) -> Option<mpsc::UnboundedReceiver<RunEvent>> {
        let runs = self.runs.lock().unwrap();
        runs.get(run_id).map(|entry| entry.channel.subscribe())
    }

    /// Cancel a run. Returns false when the run id is unknown (already
    /// evicted or never started).
    pub async fn cancel(&self, run_id: &str) -> bool {
        let runner = {
            let runs = self.runs.lock().unwrap();
            runs.get(run_id).map(|entry| entry.runner.clone())
        };
        match runner {
            Some(runner) => {
                runner.cancel().await;
                true
            }
            None => false,
        }
    }
}
