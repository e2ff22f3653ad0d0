//! Agent startup and remote command dispatch

use crate::session::handle_peer_command;
use crate::{AgentConfig, AgentContext, Bus, ChannelService, CommandQueue, ExecServer, Result, RouterChannels};
use shmux_proto::{Call, Envelope, FrameReader, FrameWriter};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A peer attached to the router
#[derive(Debug)]
pub struct Agent {
    ctx: Arc<AgentContext>,
    commands: CommandQueue,
}

impl Agent {
    /// Connect to the router named in `config` and register as `config.peer_id`
    pub async fn connect(config: AgentConfig) -> Result<Self> {
        info!("Connecting to router at {}", config.router_addr);
        let stream = TcpStream::connect(&config.router_addr).await?;
        let (read_half, write_half) = stream.into_split();
        let channels = Arc::new(RouterChannels::new(config.router_addr.clone()));
        Self::attach(config, read_half, write_half, channels).await
    }

    /// Register over an already open router connection
    pub async fn attach<R, W>(
        config: AgentConfig,
        reader: R,
        writer: W,
        channels: Arc<dyn ChannelService>,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut writer = FrameWriter::new(writer);
        writer.send(&Call::Connect).await?;
        writer.send(&Envelope::hello(config.peer_id.clone())).await?;
        info!("Registered with router as {}", config.peer_id);

        let (bus, commands) = Bus::start(FrameReader::new(reader), writer, config.outbound_capacity);
        let ctx = Arc::new(AgentContext::new(config, bus, channels));
        Ok(Self { ctx, commands })
    }

    /// Shared context
    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// Peer id
    pub fn peer_id(&self) -> &str {
        &self.ctx.peer_id
    }

    /// Serve the exec socket and remote commands until `shutdown` fires or the router goes away
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self { ctx, commands } = self;
        let server = ExecServer::bind(&ctx.config.socket_path)?;
        let stop = shutdown.child_token();
        let bus_closed = ctx.bus.cancellation();

        let dispatcher = tokio::spawn(dispatch_commands(Arc::clone(&ctx), commands, stop.clone()));

        let served = tokio::select! {
            served = server.serve(Arc::clone(&ctx), stop.clone()) => served,
            _ = bus_closed.cancelled() => {
                info!("Router connection lost, stopping agent");
                Ok(())
            }
        };

        stop.cancel();
        ctx.bus.shutdown();
        if let Err(e) = dispatcher.await {
            warn!("Command dispatcher panicked: {}", e);
        }
        info!("Agent {} stopped", ctx.peer_id);
        served
    }
}

/// Start one session per command arriving from the bus
pub async fn dispatch_commands(ctx: Arc<AgentContext>, mut commands: CommandQueue, shutdown: CancellationToken) {
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => command,
        };
        let Some(envelope) = command else {
            debug!("Command queue closed");
            break;
        };
        debug!("Remote command from {} on {}", envelope.from, envelope.channel);
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_peer_command(ctx, envelope).await {
                warn!("Remote session failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use shmux_proto::{Flag, Payload};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

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
    async fn test_attach_sends_call_and_hello() {
        let (agent_end, router_end) = tokio::io::duplex(64 * 1024);
        let (r, w) = tokio::io::split(agent_end);
        let config = AgentConfig {
            peer_id: "alpha".to_string(),
            ..AgentConfig::default()
        };
        let agent = Agent::attach(config, r, w, Arc::new(NoChannels)).await.unwrap();
        assert_eq!(agent.peer_id(), "alpha");

        let (router_r, _router_w) = tokio::io::split(router_end);
        let mut reader = FrameReader::new(router_r);
        let call: Call = reader.recv().await.unwrap().unwrap();
        assert_eq!(call, Call::Connect);
        let hello: Envelope = reader.recv().await.unwrap().unwrap();
        assert_eq!(hello, Envelope::hello("alpha"));
    }

    #[tokio::test]
    async fn test_run_dispatches_and_stops_with_router() {
        let dir = TempDir::new().unwrap();
        let (agent_end, router_end) = tokio::io::duplex(64 * 1024);
        let (r, w) = tokio::io::split(agent_end);
        let config = AgentConfig {
            peer_id: "alpha".to_string(),
            socket_path: dir.path().join("alpha.sock"),
            shell: "sh".to_string(),
            ..AgentConfig::default()
        };
        let agent = Agent::attach(config, r, w, Arc::new(NoChannels)).await.unwrap();
        let running = tokio::spawn(agent.run(CancellationToken::new()));

        let (router_r, router_w) = tokio::io::split(router_end);
        let mut reader = FrameReader::new(router_r);
        let mut writer = FrameWriter::new(router_w);
        let _: Call = reader.recv().await.unwrap().unwrap();
        let _: Envelope = reader.recv().await.unwrap().unwrap();

        writer.send(&Envelope::new("ch3", "req", "alpha", Payload::Command("echo remote".into()))).await.unwrap();
        writer.send(&Envelope::new("ch3", "req", "alpha", Payload::EofStdin)).await.unwrap();

        let mut stdout = Vec::new();
        let mut eofs = 0;
        while eofs < 2 {
            let env: Envelope = timeout(Duration::from_secs(5), reader.recv()).await.unwrap().unwrap().unwrap();
            assert_eq!(env.channel, "ch3");
            assert_eq!(env.to, "req");
            match env.flag {
                Flag::MsgStdout => stdout.extend_from_slice(&env.data),
                Flag::EofStdout | Flag::EofStderr => eofs += 1,
                other => panic!("unexpected {other}"),
            }
        }
        assert_eq!(Bytes::from(stdout), Bytes::from("remote\n"));

        drop(reader);
        drop(writer);
        let result = timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(!dir.path().join("alpha.sock").exists());
    }
}
