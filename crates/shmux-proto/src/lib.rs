//! # shmux Protocol
//!
//! Envelope model, typed payloads and the length-prefixed frame codec shared by the
//! router, the agents and the front-end.

#![warn(missing_docs)]

/// Envelope and flag definitions
pub mod envelope;

/// Typed view of an envelope's flag and data
pub mod payload;

/// Per-stream `MSG* EOF` bookkeeping
pub mod grammar;

/// Router call selection
pub mod call;

/// Frame codec for async streams
pub mod codec;

/// Framed reader/writer halves over a duplex connection
pub mod connection;

/// Error types for protocol operations
pub mod error;

pub use call::{Call, ChannelReply};
pub use codec::FrameCodec;
pub use connection::{FrameReader, FrameWriter};
pub use envelope::{Envelope, Flag};
pub use error::ProtocolError;
pub use grammar::{Admission, StreamTracker};
pub use payload::{Payload, StdStream};

/// Peer id that always means "execute on the receiving agent".
pub const LOCAL_PEER: &str = "local";
