use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ClawdiniError, Result};

/// Top-level Clawdini configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Connection settings for the remote agent gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    /// Shared auth token, if the gateway requires one.
    #[serde(default)]
    pub token: Option<String>,
    /// Path of the device identity file. Default: ~/.clawdini/identity.json
    #[serde(default)]
    pub identity_path: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_client_mode")]
    pub client_mode: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long to wait for a `connect.challenge` before signing without a
    /// nonce.
    #[serde(default = "default_challenge_wait")]
    pub challenge_wait_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            token: None,
            identity_path: None,
            client_id: default_client_id(),
            client_mode: default_client_mode(),
            role: default_role(),
            scopes: default_scopes(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            challenge_wait_ms: default_challenge_wait(),
        }
    }
}

impl GatewayConfig {
    /// Resolve the identity file path (expand ~).
    pub fn identity_file(&self) -> PathBuf {
        match &self.identity_path {
            Some(path) => expand_home(path),
            None => match home_dir() {
                Some(home) => home.join(".clawdini").join("identity.json"),
                None => PathBuf::from(".clawdini/identity.json"),
            },
        }
    }
}

/// HTTP surface for run submission and event streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Tunables for the graph runner and run registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ceiling on a single chat round-trip (agent/merge/judge/extract).
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_secs: u64,
    /// Delay before `runStarted` so interactive subscribers can attach.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// Events buffered per run for late subscribers.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// How long a terminated run stays subscribable.
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chat_timeout_secs: default_chat_timeout(),
            settle_delay_ms: default_settle_delay(),
            event_buffer: default_event_buffer(),
            grace_secs: default_grace(),
        }
    }
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:18789".to_string()
}
fn default_client_id() -> String {
    "clawdini".to_string()
}
fn default_client_mode() -> String {
    "backend".to_string()
}
fn default_role() -> String {
    "operator".to_string()
}
fn default_scopes() -> Vec<String> {
    vec!["operator.read".to_string(), "operator.write".to_string()]
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_challenge_wait() -> u64 {
    800
}
fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_chat_timeout() -> u64 {
    120
}
fn default_settle_delay() -> u64 {
    500
}
fn default_event_buffer() -> usize {
    500
}
fn default_grace() -> u64 {
    10
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ClawdiniError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| ClawdiniError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut name = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                if inner == '}' {
                    closed = true;
                    break;
                }
                name.push(inner);
            }
            if closed {
                match std::env::var(&name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => {
                        result.push_str("${");
                        result.push_str(&name);
                        result.push('}');
                    }
                }
            } else {
                result.push_str("${");
                result.push_str(&name);
            }
        } else {
            result.push(c);
        }
    }

    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
