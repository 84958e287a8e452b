pub mod levels;
pub mod registry;
pub mod runner;
pub mod state;
pub mod subgraph;
pub mod template;

mod nodes;

pub use registry::{EventSink, RunChannel, RunRegistry};
pub use runner::GraphRunner;
