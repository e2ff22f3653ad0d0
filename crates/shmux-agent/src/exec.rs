//! Front-end exec socket

use crate::session::handle_frontend;
use crate::{AgentContext, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Unix socket listener for front-end exec calls
///
/// The socket file is removed when the server is dropped.
#[derive(Debug)]
pub struct ExecServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ExecServer {
    /// Bind the socket at `path`, replacing a stale socket file
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        info!("Exec socket listening on {}", path.display());
        Ok(Self { listener, path })
    }

    /// Socket path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept front-end connections until `shutdown` fires
    ///
    /// Each connection runs as its own session task; cancelling `shutdown` also cancels them.
    pub async fn serve(&self, ctx: Arc<AgentContext>, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Exec socket shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, _) = accepted?;
                    debug!("Accepted front-end connection");
                    let ctx = Arc::clone(&ctx);
                    let cancel = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_frontend(ctx, stream, cancel).await {
                            warn!("Exec call failed: {}", e);
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

impl Drop for ExecServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Failed to remove socket {}: {}", self.path.display(), e);
        }
    }
}
