//! Connection handling and accept loop

use crate::{ChannelAllocator, PeerDirectory, Result, RouterConfig, RouterError};
use shmux_proto::{Call, ChannelReply, Envelope, FrameReader, FrameWriter, ProtocolError};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Central router: peer directory plus channel allocator
#[derive(Debug, Clone, Default)]
pub struct Router {
    directory: Arc<PeerDirectory>,
    channels: Arc<ChannelAllocator>,
}

impl Router {
    /// Create a router with an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Peer directory
    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Channel-id allocator
    pub fn channels(&self) -> &Arc<ChannelAllocator> {
        &self.channels
    }

    /// Registered peer ids, sorted
    pub async fn peers(&self) -> Vec<String> {
        self.directory.peers().await
    }

    /// Bind the listener described by `config`
    pub async fn bind(config: &RouterConfig) -> Result<TcpListener> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!("Router listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until `shutdown` fires
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Router shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    debug!("Accepted connection from {}", addr);
                    let router = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = router.handle_connection(stream).await {
                            warn!("Connection from {} ended: {}", addr, e);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Serve one connection: read its call frame and dispatch
    pub async fn handle_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);

        let call: Call = reader.recv().await?.ok_or(RouterError::NoCall)?;
        match call {
            Call::Connect => self.connect(reader, writer).await,
            Call::CreateChannel => {
                let id = self.channels.create().await;
                writer.send(&ChannelReply::Created { id }).await?;
                writer.shutdown().await?;
                Ok(())
            }
            Call::DeleteChannel { id } => {
                self.channels.delete(&id).await;
                writer.send(&ChannelReply::Deleted).await?;
                writer.shutdown().await?;
                Ok(())
            }
        }
    }

    /// Run a peer's envelope stream
    ///
    /// The first envelope names the peer. Every later envelope is relayed to the peer in
    /// its `to` field; misses are dropped. The peer is unregistered when the stream ends.
    pub async fn connect<R, W>(&self, mut reader: FrameReader<R>, mut writer: FrameWriter<W>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let hello: Envelope = reader.recv().await?.ok_or(RouterError::NoHello)?;
        if hello.from.is_empty() {
            return Err(ProtocolError::MissingPeerId.into());
        }
        let peer_id = hello.from;

        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let writer_peer = peer_id.clone();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Err(e) = writer.send(&envelope).await {
                    error!("Failed to write to peer {}: {}", writer_peer, e);
                    break;
                }
            }
            debug!("Writer for peer {} stopped", writer_peer);
        });

        let token = self.directory.register(&peer_id, tx).await;

        let outcome = loop {
            match reader.recv::<Envelope>().await {
                Ok(Some(envelope)) => {
                    self.directory.forward(envelope).await;
                }
                Ok(None) => {
                    info!("Peer {} disconnected", peer_id);
                    break Ok(());
                }
                Err(e) => {
                    warn!("Failed to receive from peer {}: {}", peer_id, e);
                    break Err(e.into());
                }
            }
        };

        self.directory.unregister(&peer_id, token).await;
        outcome
    }
}
