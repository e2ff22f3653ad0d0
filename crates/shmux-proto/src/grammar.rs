//! Per-stream `MSG* EOF` bookkeeping
//!
//! Every sub-stream of a session is a run of chunks closed by exactly one EOF marker.
//! [`StreamTracker`] sits in front of a writer and decides which frames may go out.

use crate::{Payload, StdStream};

/// Verdict for one outgoing or incoming payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Frame is valid here and should be passed on
    Forward,
    /// Zero-length chunk; never put on the wire
    SkipEmpty,
    /// Repeated EOF marker; no-op
    DuplicateEof,
    /// Chunk after its stream already ended
    AfterEof,
}

/// Tracks which of the three streams have seen their EOF marker
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    closed: [bool; 3],
}

impl StreamTracker {
    /// Create a tracker with all streams open
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a payload against the grammar and record EOF markers
    ///
    /// Commands are always forwarded; they are not part of any stream.
    pub fn admit(&mut self, payload: &Payload) -> Admission {
        let Some(stream) = payload.stream() else {
            return Admission::Forward;
        };
        let closed = &mut self.closed[stream.index()];
        if payload.is_eof() {
            if *closed {
                return Admission::DuplicateEof;
            }
            *closed = true;
            return Admission::Forward;
        }
        if *closed {
            Admission::AfterEof
        } else if payload.is_empty() {
            Admission::SkipEmpty
        } else {
            Admission::Forward
        }
    }

    /// Check if a stream has seen its EOF marker
    pub fn is_closed(&self, stream: StdStream) -> bool {
        self.closed[stream.index()]
    }

    /// Check if both output streams have ended
    pub fn outputs_closed(&self) -> bool {
        self.is_closed(StdStream::Stdout) && self.is_closed(StdStream::Stderr)
    }
}
