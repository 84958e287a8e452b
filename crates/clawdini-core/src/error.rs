use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClawdiniError {
    // Gateway transport errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("gateway rejected {code}: {message}")]
    Rpc { code: String, message: String },

    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    // Execution errors
    #[error("node failed: {0}")]
    Node(String),

    #[error("graph error: {0}")]
    Graph(String),

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClawdiniError>;
