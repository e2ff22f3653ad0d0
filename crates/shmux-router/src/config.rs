//! Router configuration

/// Default address the router listens on
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:50051";

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Address to accept peer and channel calls on
    pub listen_addr: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}
