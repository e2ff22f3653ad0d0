//! Framed reader/writer halves over a duplex connection

use crate::{FrameCodec, ProtocolError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Read half of a framed connection
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    codec: FrameCodec,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap the read half of a connection
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            codec: FrameCodec::new(),
        }
    }

    /// Receive the next frame, `None` once the peer closed its side
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        self.codec.read_frame(&mut self.reader).await
    }
}

/// Write half of a framed connection
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
    codec: FrameCodec,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap the write half of a connection
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            codec: FrameCodec::new(),
        }
    }

    /// Send one frame and flush it
    pub async fn send<T: Serialize>(&mut self, value: &T) -> Result<(), ProtocolError> {
        self.codec.write_frame(&mut self.writer, value).await
    }

    /// Close the write side so the peer observes end of stream
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Envelope, Payload};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_duplex_send_recv() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut client_tx = FrameWriter::new(client_write);
        let mut server_rx = FrameReader::new(server_read);
        let mut server_tx = FrameWriter::new(server_write);
        let mut client_rx = FrameReader::new(client_read);

        let env = Envelope::new("", "front", "local", Payload::Command("echo hi".into()));
        client_tx.send(&env).await.unwrap();
        let got: Envelope = server_rx.recv().await.unwrap().unwrap();
        assert_eq!(got, env);

        let reply = Envelope::new("", "local", "front", Payload::Stdout(Bytes::from("hi\n")));
        server_tx.send(&reply).await.unwrap();
        let got: Envelope = client_rx.recv().await.unwrap().unwrap();
        assert_eq!(got, reply);
    }

    #[tokio::test]
    async fn test_shutdown_signals_end_of_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.send(&Envelope::hello("a")).await.unwrap();
        writer.shutdown().await.unwrap();

        assert!(reader.recv::<Envelope>().await.unwrap().is_some());
        assert!(reader.recv::<Envelope>().await.unwrap().is_none());
    }
}
