//! # shmux
//!
//! Front-end for shmux agents. An exec call goes to the agent's unix socket; the agent runs
//! the command itself or relays it through the router to the peer named as target.

#![warn(missing_docs)]

pub use shmux_proto as proto;

/// Error types for the front-end
pub mod error;

/// Exec call client
pub mod client;

pub use client::{ExecClient, ExecInput, ExecOutput, ExecOutputs};
pub use error::ClientError;

/// Result type alias for front-end operations
pub type Result<T> = std::result::Result<T, ClientError>;
