use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clawdini_core::config::AppConfig;
use clawdini_core::graph::Graph;
use clawdini_core::traits::Gateway;
use clawdini_engine::RunRegistry;
use clawdini_gateway::GatewayClient;
use clawdini_server::OrchestratorServer;

#[derive(Parser)]
#[command(name = "clawdini", version, about = "Streaming DAG workflow orchestrator for agent gateways")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "clawdini.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the gateway and serve the run API (default)
    Serve,
    /// Execute a single graph file and print its events as NDJSON
    Run {
        /// Path to a graph JSON file
        graph: PathBuf,
        /// Global input passed to the run's source nodes
        #[arg(short, long)]
        input: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
        AppConfig::default()
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Run { graph, input } => run_once(config, graph, input).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let gateway: Arc<dyn Gateway> = GatewayClient::connect(&config.gateway).await?;
    let registry = RunRegistry::new(gateway.clone(), config.engine.clone());
    let server = OrchestratorServer::new(config.server.clone(), registry, gateway);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal.cancel();
        }
    });

    server.run(shutdown).await?;
    Ok(())
}

async fn run_once(config: AppConfig, path: PathBuf, input: Option<String>) -> anyhow::Result<()> {
    let graph: Graph = serde_json::from_str(&std::fs::read_to_string(&path)?)?;

    let gateway: Arc<dyn Gateway> = GatewayClient::connect(&config.gateway).await?;
    let registry = RunRegistry::new(gateway, config.engine.clone());

    let run_id = registry.start(graph, input)?;
    let Some(mut events) = registry.subscribe(&run_id) else {
        anyhow::bail!("run {run_id} ended before it could be observed");
    };

    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if event.is_terminal() {
            break;
        }
    }
    Ok(())
}
