//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid frame format
    #[error("Invalid frame format")]
    InvalidFrame,

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Underlying connection failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Numeric flag tag outside the known set
    #[error("Unknown flag tag: {0}")]
    UnknownFlag(u8),

    /// Envelope carries `NONE`, which has no payload meaning
    #[error("Envelope has no flag")]
    MissingFlag,

    /// Command text is not valid UTF-8
    #[error("Command is not valid UTF-8")]
    InvalidCommand,

    /// First envelope on a router connection did not identify its sender
    #[error("Missing peer id in first envelope")]
    MissingPeerId,
}
