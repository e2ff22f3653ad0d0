//! Frame codec for async streams
//!
//! Every frame is a 4-byte big-endian length followed by one MessagePack document.

use crate::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec for encoding/decoding frames over async streams
#[derive(Debug)]
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Encode a value to bytes with length prefix
    pub fn encode_frame<T: Serialize>(&self, value: &T) -> Result<Bytes, ProtocolError> {
        let body = rmp_serde::to_vec(value).map_err(|e| ProtocolError::Serialization(e.to_string()))?;

        if body.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);

        Ok(buf.freeze())
    }

    /// Write a frame to an async writer
    pub async fn write_frame<T, W>(&self, writer: &mut W, value: &T) -> Result<(), ProtocolError>
    where
        T: Serialize,
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_frame(value)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a frame from an async reader
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub async fn read_frame<T, R>(&mut self, reader: &mut R) -> Result<Option<T>, ProtocolError>
    where
        T: DeserializeOwned,
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(value) = self.try_decode_frame()? {
                return Ok(Some(value));
            }

            if reader.read_buf(&mut self.read_buf).await? == 0 {
                // a partial frame at end of stream is a truncated peer
                return if self.read_buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolError::InvalidFrame)
                };
            }
        }
    }

    /// Try to decode a frame from the internal buffer
    pub fn try_decode_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        if self.read_buf.len() < 4 {
            return Ok(None);
        }

        let frame_len = (&self.read_buf[..4]).get_u32() as usize;

        if frame_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < 4 + frame_len {
            return Ok(None);
        }

        self.read_buf.advance(4);
        let body = self.read_buf.split_to(frame_len);

        let value = rmp_serde::from_slice(&body).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Some(value))
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}
