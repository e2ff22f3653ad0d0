//! Error types for the front-end

use shmux_proto::{Flag, ProtocolError};
use thiserror::Error;

/// Front-end errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Framing or envelope error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Agent closed the call before both output streams ended
    #[error("Exec stream closed before stdout and stderr finished")]
    Closed,

    /// Agent sent a frame that does not belong to the output direction
    #[error("Unexpected {0} from agent")]
    UnexpectedFlag(Flag),
}
