use std::sync::Arc;

use clawdini_core::traits::Gateway;
use clawdini_engine::RunRegistry;

/// Shared state for the run-submission routes.
pub struct AppState {
    pub registry: Arc<RunRegistry>,
    pub gateway: Arc<dyn Gateway>,
}
