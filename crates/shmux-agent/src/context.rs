//! Shared runtime context

use crate::{AgentConfig, Bus, ChannelService};
use shmux_proto::LOCAL_PEER;
use std::fmt;
use std::sync::Arc;

/// Everything a session needs, built once at startup and shared by `Arc`
pub struct AgentContext {
    /// This agent's peer id
    pub peer_id: String,
    /// Agent configuration
    pub config: AgentConfig,
    /// Multiplexer over the router connection
    pub bus: Bus,
    /// Channel-id service
    pub channels: Arc<dyn ChannelService>,
}

impl AgentContext {
    /// Create a context
    pub fn new(config: AgentConfig, bus: Bus, channels: Arc<dyn ChannelService>) -> Self {
        Self {
            peer_id: config.peer_id.clone(),
            config,
            bus,
            channels,
        }
    }

    /// Check if `target` means "run on this agent"
    pub fn is_local(&self, target: &str) -> bool {
        target.is_empty() || target == LOCAL_PEER || target == self.peer_id
    }
}

impl fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentContext")
            .field("peer_id", &self.peer_id)
            .field("config", &self.config)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;

    struct NoChannels;

    #[async_trait]
    impl ChannelService for NoChannels {
        async fn create(&self) -> Result<String> {
            Ok("ch1".to_string())
        }

        async fn delete(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_is_local() {
        let (agent_end, _router_end) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(agent_end);
        let (bus, _commands) = Bus::start(shmux_proto::FrameReader::new(r), shmux_proto::FrameWriter::new(w), 4);
        let config = AgentConfig {
            peer_id: "alpha".to_string(),
            ..AgentConfig::default()
        };
        let ctx = AgentContext::new(config, bus, Arc::new(NoChannels));

        assert!(ctx.is_local(""));
        assert!(ctx.is_local("local"));
        assert!(ctx.is_local("alpha"));
        assert!(!ctx.is_local("beta"));
    }
}
