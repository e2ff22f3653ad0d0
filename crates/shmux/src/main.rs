//! shmux Front-end Binary
//!
//! Runs one shell command on a peer through the local agent, wiring the command's stdio to
//! this process.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use shmux::client::DEFAULT_SOCKET_PATH;
use shmux::proto::{Payload, LOCAL_PEER};
use shmux::{ExecClient, ExecInput};
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Stdin read size
const CHUNK_SIZE: usize = 1024;

/// Run a shell command on a local or remote shmux peer
#[derive(Parser, Debug)]
#[command(name = "shmux")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Peer to run the command on
    #[arg(short = 'i', long, env = "SHMUX_TARGET", default_value = LOCAL_PEER)]
    id: String,

    /// Agent exec socket
    #[arg(short = 's', long, env = "SHMUX_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Shell command line
    #[arg(short = 'c', long)]
    command: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "SHMUX_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    // a pending stdin read would otherwise keep the runtime alive
    std::process::exit(0);
}

async fn run(cli: Cli) -> Result<()> {
    let client = ExecClient::connect(&cli.socket)
        .await
        .with_context(|| format!("Failed to connect to agent at {}", cli.socket.display()))?;
    let (input, mut outputs) = client
        .start(&cli.id, &cli.command)
        .await
        .context("Failed to send command")?;

    let pipe_stdin = !std::io::stdin().is_terminal();
    tokio::spawn(async move {
        if let Err(e) = feed_stdin(input, pipe_stdin).await {
            debug!("Stopped sending stdin: {:#}", e);
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    while let Some(payload) = outputs.next().await.context("Exec call failed")? {
        match payload {
            Payload::Stdout(data) => {
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            }
            Payload::Stderr(data) => {
                stderr.write_all(&data).await?;
                stderr.flush().await?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Send this process's stdin as the command's input, or just its EOF for a terminal
async fn feed_stdin(mut input: ExecInput, pipe_stdin: bool) -> Result<()> {
    if pipe_stdin {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = stdin.read(&mut buf).await.context("Failed to read stdin")?;
            if n == 0 {
                break;
            }
            input.send(Bytes::copy_from_slice(&buf[..n])).await?;
        }
    }
    input.finish().await?;
    Ok(())
}
