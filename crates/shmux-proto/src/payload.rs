//! Typed view of an envelope's flag and data

use crate::{Flag, ProtocolError};
use bytes::Bytes;

/// One of the three standard streams of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    /// Standard input
    Stdin,
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl StdStream {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }
}

/// Meaning of an envelope once its flag has been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Shell command line to execute
    Command(String),
    /// Chunk of standard input
    Stdin(Bytes),
    /// Chunk of standard output
    Stdout(Bytes),
    /// Chunk of standard error
    Stderr(Bytes),
    /// End of standard input
    EofStdin,
    /// End of standard output
    EofStdout,
    /// End of standard error
    EofStderr,
}

impl Payload {
    /// Build a payload from its wire parts
    ///
    /// EOF markers ignore any data they carry.
    pub fn from_parts(flag: Flag, data: Bytes) -> Result<Self, ProtocolError> {
        Ok(match flag {
            Flag::None => return Err(ProtocolError::MissingFlag),
            Flag::Command => {
                let text = String::from_utf8(data.to_vec()).map_err(|_| ProtocolError::InvalidCommand)?;
                Self::Command(text)
            }
            Flag::MsgStdin => Self::Stdin(data),
            Flag::MsgStdout => Self::Stdout(data),
            Flag::MsgStderr => Self::Stderr(data),
            Flag::EofStdin => Self::EofStdin,
            Flag::EofStdout => Self::EofStdout,
            Flag::EofStderr => Self::EofStderr,
        })
    }

    /// Split into wire parts
    pub fn into_parts(self) -> (Flag, Bytes) {
        match self {
            Self::Command(text) => (Flag::Command, Bytes::from(text)),
            Self::Stdin(data) => (Flag::MsgStdin, data),
            Self::Stdout(data) => (Flag::MsgStdout, data),
            Self::Stderr(data) => (Flag::MsgStderr, data),
            Self::EofStdin => (Flag::EofStdin, Bytes::new()),
            Self::EofStdout => (Flag::EofStdout, Bytes::new()),
            Self::EofStderr => (Flag::EofStderr, Bytes::new()),
        }
    }

    /// Wire flag of this payload
    pub fn flag(&self) -> Flag {
        match self {
            Self::Command(_) => Flag::Command,
            Self::Stdin(_) => Flag::MsgStdin,
            Self::Stdout(_) => Flag::MsgStdout,
            Self::Stderr(_) => Flag::MsgStderr,
            Self::EofStdin => Flag::EofStdin,
            Self::EofStdout => Flag::EofStdout,
            Self::EofStderr => Flag::EofStderr,
        }
    }

    /// Chunk payload for a stream
    pub fn chunk(stream: StdStream, data: Bytes) -> Self {
        match stream {
            StdStream::Stdin => Self::Stdin(data),
            StdStream::Stdout => Self::Stdout(data),
            StdStream::Stderr => Self::Stderr(data),
        }
    }

    /// End-of-stream marker for a stream
    pub fn eof(stream: StdStream) -> Self {
        match stream {
            StdStream::Stdin => Self::EofStdin,
            StdStream::Stdout => Self::EofStdout,
            StdStream::Stderr => Self::EofStderr,
        }
    }

    /// Stream this payload belongs to, `None` for commands
    pub fn stream(&self) -> Option<StdStream> {
        match self {
            Self::Command(_) => None,
            Self::Stdin(_) | Self::EofStdin => Some(StdStream::Stdin),
            Self::Stdout(_) | Self::EofStdout => Some(StdStream::Stdout),
            Self::Stderr(_) | Self::EofStderr => Some(StdStream::Stderr),
        }
    }

    /// Check if this is an end-of-stream marker
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::EofStdin | Self::EofStdout | Self::EofStderr)
    }

    /// Length of the carried data
    pub fn len(&self) -> usize {
        match self {
            Self::Command(text) => text.len(),
            Self::Stdin(data) | Self::Stdout(data) | Self::Stderr(data) => data.len(),
            Self::EofStdin | Self::EofStdout | Self::EofStderr => 0,
        }
    }

    /// Check if the payload carries no data
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_flag_has_no_payload() {
        let result = Payload::from_parts(Flag::None, Bytes::new());
        assert!(matches!(result, Err(ProtocolError::MissingFlag)));
    }

    #[test]
    fn test_command_must_be_utf8() {
        let result = Payload::from_parts(Flag::Command, Bytes::from_static(&[0xff, 0xfe]));
        assert!(matches!(result, Err(ProtocolError::InvalidCommand)));

        let ok = Payload::from_parts(Flag::Command, Bytes::from("ls -la")).unwrap();
        assert_eq!(ok, Payload::Command("ls -la".to_string()));
    }

    #[test]
    fn test_eof_ignores_data() {
        let payload = Payload::from_parts(Flag::EofStdout, Bytes::from("junk")).unwrap();
        assert_eq!(payload, Payload::EofStdout);
        let (flag, data) = payload.into_parts();
        assert_eq!(flag, Flag::EofStdout);
        assert!(data.is_empty());
    }

    #[test]
    fn test_stream_mapping() {
        for stream in [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr] {
            let chunk = Payload::chunk(stream, Bytes::from("x"));
            let eof = Payload::eof(stream);
            assert_eq!(chunk.stream(), Some(stream));
            assert_eq!(eof.stream(), Some(stream));
            assert!(!chunk.is_eof());
            assert!(eof.is_eof());
            assert!(eof.is_empty());
        }
        assert_eq!(Payload::Command("true".into()).stream(), None);
    }

    #[test]
    fn test_flag_agrees_with_parts() {
        let payloads = vec![
            Payload::Command("echo".into()),
            Payload::Stdin(Bytes::from("in")),
            Payload::Stdout(Bytes::from("out")),
            Payload::Stderr(Bytes::from("err")),
            Payload::EofStdin,
            Payload::EofStdout,
            Payload::EofStderr,
        ];
        for payload in payloads {
            let flag = payload.flag();
            let (wire_flag, data) = payload.clone().into_parts();
            assert_eq!(flag, wire_flag);
            assert_eq!(Payload::from_parts(wire_flag, data).unwrap(), payload);
        }
    }
}
