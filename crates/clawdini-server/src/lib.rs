mod routes;
mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use clawdini_core::config::ServerConfig;
use clawdini_core::error::Result;
use clawdini_core::traits::Gateway;
use clawdini_engine::RunRegistry;

use crate::state::AppState;

/// HTTP surface for the run lifecycle: submit, stream events (SSE), cancel,
/// plus the gateway list passthroughs a canvas editor needs.
pub struct OrchestratorServer {
    config: ServerConfig,
    registry: Arc<RunRegistry>,
    gateway: Arc<dyn Gateway>,
}

impl OrchestratorServer {
    pub fn new(config: ServerConfig, registry: Arc<RunRegistry>, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            config,
            registry,
            gateway,
        }
    }

    /// Run the server until the cancellation token is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let state = Arc::new(AppState {
            registry: self.registry.clone(),
            gateway: self.gateway.clone(),
        });

        let app = Router::new()
            .route("/api/health", get(routes::health))
            .route("/api/runs", post(routes::start_run))
            .route("/api/runs/{id}/events", get(routes::run_events))
            .route("/api/runs/{id}/cancel", post(routes::cancel_run))
            .route("/api/agents", get(routes::list_agents))
            .route("/api/models", get(routes::list_models))
            .layer(CorsLayer::permissive())
            .with_state(state);

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "orchestrator listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("orchestrator shut down");
        Ok(())
    }
}
