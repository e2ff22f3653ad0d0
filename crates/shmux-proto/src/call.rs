//! Router call selection
//!
//! A router connection starts with one [`Call`] frame that picks the service. `Connect`
//! turns the connection into a peer's envelope stream; the channel calls are answered with
//! one [`ChannelReply`] and the connection is closed.

use serde::{Deserialize, Serialize};

/// First frame on every router connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Call {
    /// Open the peer's envelope stream
    Connect,
    /// Mint a fresh channel id
    CreateChannel,
    /// Release a channel id
    DeleteChannel {
        /// Channel to release
        id: String,
    },
}

/// Router answer to a channel call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelReply {
    /// Newly minted channel id
    Created {
        /// Channel id
        id: String,
    },
    /// Acknowledgement of a delete
    Deleted,
}
