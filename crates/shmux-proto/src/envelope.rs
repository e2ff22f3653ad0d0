//! Envelope and flag definitions

use crate::{Payload, ProtocolError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of an envelope on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Flag {
    /// No role; only valid on the hello envelope of a router connection
    #[default]
    None,
    /// Shell command text
    Command,
    /// Chunk of standard input
    MsgStdin,
    /// Chunk of standard output
    MsgStdout,
    /// Chunk of standard error
    MsgStderr,
    /// End of standard input
    EofStdin,
    /// End of standard output
    EofStdout,
    /// End of standard error
    EofStderr,
}

impl Flag {
    /// Wire name of the flag
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Command => "COMMAND",
            Self::MsgStdin => "MSG_STDIN",
            Self::MsgStdout => "MSG_STDOUT",
            Self::MsgStderr => "MSG_STDERR",
            Self::EofStdin => "EOF_STDIN",
            Self::EofStdout => "EOF_STDOUT",
            Self::EofStderr => "EOF_STDERR",
        }
    }

    /// Check if this flag marks the end of a sub-stream
    pub fn is_eof(self) -> bool {
        matches!(self, Self::EofStdin | Self::EofStdout | Self::EofStderr)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Flag> for u8 {
    fn from(flag: Flag) -> Self {
        match flag {
            Flag::None => 0,
            Flag::Command => 1,
            Flag::MsgStdin => 2,
            Flag::MsgStdout => 3,
            Flag::MsgStderr => 4,
            Flag::EofStdin => 5,
            Flag::EofStdout => 6,
            Flag::EofStderr => 7,
        }
    }
}

impl TryFrom<u8> for Flag {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Self::None,
            1 => Self::Command,
            2 => Self::MsgStdin,
            3 => Self::MsgStdout,
            4 => Self::MsgStderr,
            5 => Self::EofStdin,
            6 => Self::EofStdout,
            7 => Self::EofStderr,
            other => return Err(ProtocolError::UnknownFlag(other)),
        })
    }
}

/// Unit of wire communication
///
/// The same shape travels on all three calls: front-end to agent (`channel` empty),
/// agent back to front-end, and peer to peer through the router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Channel id, empty for messages that are not multiplexed yet
    pub channel: String,
    /// Sending peer id
    pub from: String,
    /// Receiving peer id, empty means "do not route"
    pub to: String,
    /// Role of this envelope
    pub flag: Flag,
    /// Payload bytes, interpreted according to `flag`
    pub data: Bytes,
}

impl Envelope {
    /// Create an envelope carrying a typed payload
    pub fn new(
        channel: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: Payload,
    ) -> Self {
        let (flag, data) = payload.into_parts();
        Self {
            channel: channel.into(),
            from: from.into(),
            to: to.into(),
            flag,
            data,
        }
    }

    /// Create the identifying envelope an agent sends right after connecting to the router
    pub fn hello(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Self::default()
        }
    }

    /// Typed view of `flag` and `data`
    pub fn payload(&self) -> Result<Payload, ProtocolError> {
        Payload::from_parts(self.flag, self.data.clone())
    }

    /// Consume the envelope into its typed payload
    pub fn into_payload(self) -> Result<Payload, ProtocolError> {
        Payload::from_parts(self.flag, self.data)
    }

    /// Check if the router has someone to deliver this envelope to
    pub fn is_routable(&self) -> bool {
        !self.to.is_empty()
    }

    /// Check if this envelope starts a new execution
    pub fn is_command(&self) -> bool {
        self.flag == Flag::Command
    }
}
