//! Envelope sources and sinks used by sessions
//!
//! A session talks to two kinds of endpoints: a front-end exec connection and a bus channel.
//! Both are reduced to [`EnvelopeSource`] and [`EnvelopeSink`] so the copiers do not care which
//! one they are wired to.

use crate::{AgentError, Result};
use async_trait::async_trait;
use shmux_proto::{Envelope, FrameReader, FrameWriter, Payload};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Something envelopes can be read from
#[async_trait]
pub trait EnvelopeSource: Send {
    /// Next envelope, `None` once the other side is done
    async fn recv_envelope(&mut self) -> Result<Option<Envelope>>;
}

/// Something envelopes can be written to
#[async_trait]
pub trait EnvelopeSink: Send {
    /// Send one envelope
    async fn send_envelope(&mut self, envelope: Envelope) -> Result<()>;
}

#[async_trait]
impl<R> EnvelopeSource for FrameReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv_envelope(&mut self) -> Result<Option<Envelope>> {
        Ok(self.recv().await?)
    }
}

#[async_trait]
impl<W> EnvelopeSink for FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_envelope(&mut self, envelope: Envelope) -> Result<()> {
        Ok(self.send(&envelope).await?)
    }
}

#[async_trait]
impl EnvelopeSource for mpsc::UnboundedReceiver<Envelope> {
    async fn recv_envelope(&mut self) -> Result<Option<Envelope>> {
        Ok(self.recv().await)
    }
}

#[async_trait]
impl EnvelopeSink for mpsc::Sender<Envelope> {
    async fn send_envelope(&mut self, envelope: Envelope) -> Result<()> {
        self.send(envelope).await.map_err(|_| AgentError::BusClosed)
    }
}

/// Addressing stamped onto every envelope a session emits in one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Channel id, empty on front-end connections
    pub channel: String,
    /// Sending peer
    pub from: String,
    /// Receiving peer
    pub to: String,
}

impl Route {
    /// Create a route
    pub fn new(channel: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Wrap a payload in an envelope addressed along this route
    pub fn wrap(&self, payload: Payload) -> Envelope {
        Envelope::new(self.channel.clone(), self.from.clone(), self.to.clone(), payload)
    }
}
