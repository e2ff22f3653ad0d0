//! shmux Router Binary
//!
//! Central directory that relays envelopes between connected agents.

use anyhow::{Context, Result};
use clap::Parser;
use shmux_router::{Router, RouterConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Relay for shell sessions between shmux agents
#[derive(Parser, Debug)]
#[command(name = "shmux-router")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short = 'l', long, env = "SHMUX_ROUTER_LISTEN", default_value = shmux_router::config::DEFAULT_LISTEN_ADDR)]
    listen: String,

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

    let config = RouterConfig { listen_addr: cli.listen };
    let listener = Router::bind(&config)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen_addr))?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, stopping router");
                shutdown.cancel();
            }
        });
    }

    let router = Router::new();
    if let Err(e) = router.serve(listener, shutdown).await {
        error!("Router error: {}", e);
        std::process::exit(1);
    }

    info!("Router shut down");
    Ok(())
}
