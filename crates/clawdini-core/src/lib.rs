pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ClawdiniError, Result};
pub use event::RunEvent;
pub use graph::{Edge, Graph, GraphNode, NodeKind};
pub use types::*;
