//! # shmux Agent
//!
//! Per-peer runtime: the bus that multiplexes channels over the router connection, the
//! execution sessions, and the exec socket served to local front-ends.

#![warn(missing_docs)]

/// Agent startup and remote command dispatch
pub mod agent;

/// Channel multiplexer over the router connection
pub mod bus;

/// Client for the router's channel-id service
pub mod channels;

/// Agent configuration
pub mod config;

/// Shared runtime context
pub mod context;

/// Envelope sources and sinks used by sessions
pub mod endpoint;

/// Error types for the agent
pub mod error;

/// Front-end exec socket
pub mod exec;

/// Shell subprocess spawning
pub mod process;

/// Execution session state machine
pub mod session;

pub use agent::Agent;
pub use bus::{Bus, ChannelHandle, CommandQueue};
pub use channels::{ChannelService, RouterChannels};
pub use config::AgentConfig;
pub use context::AgentContext;
pub use error::AgentError;
pub use exec::ExecServer;
pub use session::{handle_frontend, handle_peer_command, Session, SessionState};

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
