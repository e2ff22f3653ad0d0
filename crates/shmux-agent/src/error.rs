//! Error types for the agent

use shmux_proto::{Flag, ProtocolError};
use thiserror::Error;

/// Agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// Framing or envelope error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket or pipe failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Subprocess could not be started
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        /// Command line that failed
        command: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Subprocess started without one of its pipes
    #[error("Subprocess has no {0} pipe")]
    Pipe(&'static str),

    /// First frame of an exec call was not a command
    #[error("Expected COMMAND, got {0}")]
    NotACommand(Flag),

    /// Exec call closed before sending its command
    #[error("Exec stream closed before a command was received")]
    NoCommand,

    /// A session already owns this channel's inbound queue
    #[error("Channel already in use: {0}")]
    ChannelInUse(String),

    /// Router connection is gone
    #[error("Bus closed")]
    BusClosed,

    /// Router answered a channel call with something unexpected
    #[error("Unexpected channel service reply")]
    UnexpectedReply,
}
