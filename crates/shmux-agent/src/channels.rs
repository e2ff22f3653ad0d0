//! Client for the router's channel-id service

use crate::{AgentError, Result};
use async_trait::async_trait;
use shmux_proto::{Call, ChannelReply, FrameReader, FrameWriter};
use tokio::net::TcpStream;
use tracing::debug;

/// Source of network-unique channel ids
#[async_trait]
pub trait ChannelService: Send + Sync {
    /// Mint a fresh channel id
    async fn create(&self) -> Result<String>;

    /// Release a channel id
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Channel service backed by the router, one short connection per call
#[derive(Debug, Clone)]
pub struct RouterChannels {
    addr: String,
}

impl RouterChannels {
    /// Create a client for the router at `addr`
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Router address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, call: Call) -> Result<ChannelReply> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, write_half) = stream.into_split();
        let mut writer = FrameWriter::new(write_half);
        let mut reader = FrameReader::new(read_half);

        writer.send(&call).await?;
        reader.recv().await?.ok_or(AgentError::UnexpectedReply)
    }
}

#[async_trait]
impl ChannelService for RouterChannels {
    async fn create(&self) -> Result<String> {
        match self.call(Call::CreateChannel).await? {
            ChannelReply::Created { id } => {
                debug!("Router allocated channel {}", id);
                Ok(id)
            }
            ChannelReply::Deleted => Err(AgentError::UnexpectedReply),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.call(Call::DeleteChannel { id: id.to_string() }).await? {
            ChannelReply::Deleted => Ok(()),
            ChannelReply::Created { .. } => Err(AgentError::UnexpectedReply),
        }
    }
}
