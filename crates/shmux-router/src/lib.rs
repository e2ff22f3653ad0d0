//! # shmux Router
//!
//! Process-wide peer directory, envelope relay and channel-id allocator.

#![warn(missing_docs)]

/// Channel-id allocation service
pub mod allocator;

/// Router configuration
pub mod config;

/// Peer directory and forwarding
pub mod directory;

/// Error types for the router
pub mod error;

/// Connection handling and accept loop
pub mod server;

pub use allocator::ChannelAllocator;
pub use config::RouterConfig;
pub use directory::{Delivery, PeerDirectory};
pub use error::RouterError;
pub use server::Router;

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;
