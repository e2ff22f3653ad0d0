//! Error types for the router

use shmux_proto::ProtocolError;
use thiserror::Error;

/// Router errors
#[derive(Debug, Error)]
pub enum RouterError {
    /// Framing or envelope error on a connection
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Listener or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection closed before sending its call frame
    #[error("Connection closed before selecting a call")]
    NoCall,

    /// Connection closed before identifying its peer
    #[error("Connection closed before identifying its peer")]
    NoHello,
}
