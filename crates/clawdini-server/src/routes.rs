use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use clawdini_core::graph::Graph;

use crate::state::AppState;

// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
pub struct StartRunBody {
    pub graph: Graph,
    #[serde(default)]
    pub input: Option<String>,
}

// POST /api/runs — submit a graph, get a run id back
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartRunBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.registry.start(body.graph, body.input) {
        Ok(run_id) => {
            info!(run_id = %run_id, "run accepted");
            Ok(Json(json!({ "runId": run_id })))
        }
        Err(e) => {
            warn!(error = %e, "run submission rejected");
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            ))
        }
    }
}

// GET /api/runs/{id}/events — server-sent event stream of run events
pub async fn run_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let rx = state.registry.subscribe(&id).ok_or(StatusCode::NOT_FOUND)?;

    let connected = stream::once(async move {
        Ok(Event::default().data(json!({ "type": "connected", "runId": id }).to_string()))
    });
    let events = UnboundedReceiverStream::new(rx).map(|event| {
        Ok(Event::default().data(serde_json::to_string(&event).unwrap_or_default()))
    });

    Ok(Sse::new(connected.chain(events)).keep_alive(KeepAlive::new()))
}

// POST /api/runs/{id}/cancel
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if state.registry.cancel(&id).await {
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// GET /api/agents — passthrough for editor pickers
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.gateway.agents_list().await {
        Ok(agents) => Ok(Json(serde_json::to_value(agents).unwrap_or_default())),
        Err(e) => {
            warn!(error = %e, "agents.list failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

// GET /api/models — passthrough for editor pickers
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.gateway.models_list().await {
        Ok(models) => Ok(Json(serde_json::to_value(models).unwrap_or_default())),
        Err(e) => {
            warn!(error = %e, "models.list failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}
