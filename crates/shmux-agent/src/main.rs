//! shmux Agent Binary
//!
//! Per-peer agent: registers with the router, runs remote commands sent to this peer and
//! serves the exec socket for local front-ends.

use anyhow::{Context, Result};
use clap::Parser;
use shmux_agent::config::{DEFAULT_ROUTER_ADDR, DEFAULT_SOCKET_PATH};
use shmux_agent::{Agent, AgentConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Run shell commands for local front-ends and remote peers
#[derive(Parser, Debug)]
#[command(name = "shmux-agent")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Peer id to register with the router (random if omitted)
    #[arg(short = 'i', long, env = "SHMUX_PEER_ID")]
    id: Option<String>,

    /// Router address
    #[arg(short = 'r', long, env = "SHMUX_ROUTER", default_value = DEFAULT_ROUTER_ADDR)]
    router: String,

    /// Unix socket for front-end exec calls
    #[arg(short = 's', long, env = "SHMUX_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Shell used to run commands
    #[arg(long, env = "SHMUX_SHELL", default_value = "bash")]
    shell: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "SHMUX_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let mut config = AgentConfig {
        router_addr: cli.router,
        socket_path: cli.socket,
        shell: cli.shell,
        ..AgentConfig::default()
    };
    if let Some(id) = cli.id {
        config.peer_id = id;
    }

    info!("Starting shmux agent {}", config.peer_id);
    let router_addr = config.router_addr.clone();
    let agent = Agent::connect(config)
        .await
        .with_context(|| format!("Failed to register with router at {router_addr}"))?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, stopping agent");
                shutdown.cancel();
            }
        });
    }

    if let Err(e) = agent.run(shutdown).await {
        error!("Agent error: {}", e);
        std::process::exit(1);
    }

    info!("Agent shut down");
    Ok(())
}
