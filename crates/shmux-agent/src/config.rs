//! Agent configuration

use std::path::PathBuf;

/// Default router address
pub const DEFAULT_ROUTER_ADDR: &str = "127.0.0.1:50051";

/// Default exec socket path
pub const DEFAULT_SOCKET_PATH: &str = "agent.sock";

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Peer id registered with the router
    pub peer_id: String,
    /// Router address
    pub router_addr: String,
    /// Unix socket front-ends connect to
    pub socket_path: PathBuf,
    /// Shell used as `<shell> -c <command>`
    pub shell: String,
    /// Read size for subprocess output
    pub chunk_size: usize,
    /// Capacity of each channel's outbound queue
    pub outbound_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            peer_id: uuid::Uuid::new_v4().to_string(),
            router_addr: DEFAULT_ROUTER_ADDR.to_string(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            shell: "bash".to_string(),
            chunk_size: 1024,
            outbound_capacity: 64,
        }
    }
}
