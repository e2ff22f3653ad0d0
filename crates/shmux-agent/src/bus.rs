//! Channel multiplexer over the router connection
//!
//! One receive loop demultiplexes inbound envelopes by channel id; one sender loop per
//! channel serializes that channel's outbound envelopes onto the shared connection.
//! Envelopes flagged `COMMAND` go to the [`CommandQueue`] instead of a channel.

use crate::endpoint::{EnvelopeSink, EnvelopeSource};
use crate::{AgentError, Result};
use shmux_proto::Envelope;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Queue of commands addressed to this peer that no channel owns yet
pub type CommandQueue = mpsc::UnboundedReceiver<Envelope>;

/// How many closed channel ids are remembered for dropping late frames
const CLOSED_HISTORY: usize = 1024;

/// Shared write side of the router connection
type SharedSink = Arc<Mutex<Box<dyn EnvelopeSink>>>;

/// Inbound queue for one channel; the receiver waits here until a session claims it
#[derive(Debug)]
struct InboundSlot {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Option<mpsc::UnboundedReceiver<Envelope>>,
}

impl InboundSlot {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

/// Channel id to queue maps
#[derive(Debug, Default)]
struct ChannelMaps {
    inbound: HashMap<String, InboundSlot>,
    outbound: HashMap<String, mpsc::Sender<Envelope>>,
    closed: HashSet<String>,
    closed_order: VecDeque<String>,
}

impl ChannelMaps {
    fn remember_closed(&mut self, id: &str) {
        if !self.closed.insert(id.to_string()) {
            return;
        }
        self.closed_order.push_back(id.to_string());
        if self.closed_order.len() > CLOSED_HISTORY {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }

    fn reopen(&mut self, id: &str) {
        if self.closed.remove(id) {
            self.closed_order.retain(|closed| closed != id);
        }
    }
}

struct BusInner {
    channels: RwLock<ChannelMaps>,
    writer: SharedSink,
    outbound_capacity: usize,
    cancel: CancellationToken,
}

/// Per-peer multiplexer owning the single router connection
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

/// A session's view of one channel: its inbound queue and a sender for its outbound queue
#[derive(Debug)]
pub struct ChannelHandle {
    /// Channel id
    pub id: String,
    /// Envelopes the router delivered for this channel
    pub inbound: mpsc::UnboundedReceiver<Envelope>,
    /// Envelopes to put on the connection, in order
    pub outbound: mpsc::Sender<Envelope>,
}

impl Bus {
    /// Start the receive loop over an already identified router connection
    pub fn start<S, K>(source: S, sink: K, outbound_capacity: usize) -> (Self, CommandQueue)
    where
        S: EnvelopeSource + 'static,
        K: EnvelopeSink + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(BusInner {
            channels: RwLock::new(ChannelMaps::default()),
            writer: Arc::new(Mutex::new(Box::new(sink))),
            outbound_capacity: outbound_capacity.max(1),
            cancel: CancellationToken::new(),
        });

        tokio::spawn(receive_loop(Arc::clone(&inner), source, command_tx));
        info!("Bus started");

        (Self { inner }, command_rx)
    }

    /// Open the queue pair for `id`
    ///
    /// The first call for an id spawns its sender loop. The inbound queue can be claimed
    /// only once per id.
    pub async fn channel(&self, id: &str) -> Result<ChannelHandle> {
        let mut maps = self.inner.channels.write().await;
        // the receive loop cancels before it clears the maps under this lock
        if self.inner.cancel.is_cancelled() {
            return Err(AgentError::BusClosed);
        }
        debug!("Opening channel: {}", id);
        maps.reopen(id);

        let inbound = maps
            .inbound
            .entry(id.to_string())
            .or_insert_with(InboundSlot::new)
            .rx
            .take()
            .ok_or_else(|| AgentError::ChannelInUse(id.to_string()))?;

        let outbound = match maps.outbound.get(id) {
            Some(tx) => tx.clone(),
            None => {
                let (tx, rx) = mpsc::channel(self.inner.outbound_capacity);
                maps.outbound.insert(id.to_string(), tx.clone());
                tokio::spawn(sender_loop(Arc::clone(&self.inner), id.to_string(), rx));
                tx
            }
        };

        Ok(ChannelHandle {
            id: id.to_string(),
            inbound,
            outbound,
        })
    }

    /// Remove both queues for `id`; unknown ids are ignored
    ///
    /// The sender loop keeps draining until every handle's outbound sender is dropped.
    /// Frames that arrive for `id` afterwards are dropped instead of opening a new queue.
    pub async fn close(&self, id: &str) {
        let mut maps = self.inner.channels.write().await;
        let had_inbound = maps.inbound.remove(id).is_some();
        let had_outbound = maps.outbound.remove(id).is_some();
        if had_inbound || had_outbound {
            maps.remember_closed(id);
            debug!("Closed channel: {}", id);
        }
    }

    /// Number of channel ids with a live queue
    pub async fn channel_count(&self) -> usize {
        let maps = self.inner.channels.read().await;
        let mut count = maps.inbound.len();
        count += maps.outbound.keys().filter(|id| !maps.inbound.contains_key(*id)).count();
        count
    }

    /// Token cancelled once the router connection is gone
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Check if the router connection is gone
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Stop the receive loop and release every waiting session
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("outbound_capacity", &self.inner.outbound_capacity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl BusInner {
    /// Hand a non-command envelope to its channel's inbound queue, creating it if needed
    ///
    /// Frames for a recently closed channel are dropped.
    async fn deliver(&self, envelope: Envelope) {
        let existing = {
            let maps = self.channels.read().await;
            if maps.closed.contains(&envelope.channel) {
                debug!("Dropping {} for closed channel {}", envelope.flag, envelope.channel);
                return;
            }
            maps.inbound.get(&envelope.channel).map(|slot| slot.tx.clone())
        };
        let tx = match existing {
            Some(tx) => tx,
            None => {
                let mut maps = self.channels.write().await;
                if maps.closed.contains(&envelope.channel) {
                    debug!("Dropping {} for closed channel {}", envelope.flag, envelope.channel);
                    return;
                }
                maps.inbound
                    .entry(envelope.channel.clone())
                    .or_insert_with(InboundSlot::new)
                    .tx
                    .clone()
            }
        };

        let channel = envelope.channel.clone();
        if tx.send(envelope).is_err() {
            debug!("Inbound queue for channel {} already released, dropping frame", channel);
        }
    }
}

async fn receive_loop<S>(inner: Arc<BusInner>, mut source: S, commands: mpsc::UnboundedSender<Envelope>)
where
    S: EnvelopeSource,
{
    loop {
        let next = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            next = source.recv_envelope() => next,
        };

        match next {
            Ok(Some(envelope)) => {
                debug!(
                    "Bus received: {} <- {}, channel={}, flag={}, length={}",
                    envelope.to,
                    envelope.from,
                    envelope.channel,
                    envelope.flag,
                    envelope.data.len()
                );
                if envelope.is_command() {
                    if commands.send(envelope).is_err() {
                        warn!("Command queue closed, dropping remote command");
                    }
                } else {
                    inner.deliver(envelope).await;
                }
            }
            Ok(None) => {
                info!("Router connection closed");
                break;
            }
            Err(e) => {
                error!("Failed to receive from router: {}", e);
                break;
            }
        }
    }

    inner.cancel.cancel();
    // dropping the inbound senders wakes every session still waiting on a channel
    let mut maps = inner.channels.write().await;
    maps.inbound.clear();
    maps.outbound.clear();
    debug!("Bus receive loop stopped");
}

async fn sender_loop(inner: Arc<BusInner>, id: String, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        debug!(
            "Bus sending: {} -> {}, channel={}, flag={}, length={}",
            envelope.from,
            envelope.to,
            envelope.channel,
            envelope.flag,
            envelope.data.len()
        );
        let mut writer = inner.writer.lock().await;
        if let Err(e) = writer.send_envelope(envelope).await {
            error!("Failed to send on channel {}: {}", id, e);
            inner.cancel.cancel();
            break;
        }
    }
    debug!("Sender loop for channel {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use shmux_proto::{FrameReader, FrameWriter, Payload};
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::time::timeout;

    /// Bus wired to an in-memory "router" end
    fn bus_with_router() -> (Bus, CommandQueue, FrameReader<ReadHalf<DuplexStream>>, FrameWriter<WriteHalf<DuplexStream>>) {
        let (agent_end, router_end) = tokio::io::duplex(64 * 1024);
        let (agent_read, agent_write) = tokio::io::split(agent_end);
        let (router_read, router_write) = tokio::io::split(router_end);
        let (bus, commands) = Bus::start(FrameReader::new(agent_read), FrameWriter::new(agent_write), 8);
        (bus, commands, FrameReader::new(router_read), FrameWriter::new(router_write))
    }

    #[tokio::test]
    async fn test_commands_go_to_command_queue() {
        let (_bus, mut commands, _router_rx, mut router_tx) = bus_with_router();
        let cmd = Envelope::new("ch1", "a", "b", Payload::Command("cat".into()));
        router_tx.send(&cmd).await.unwrap();

        let got = timeout(Duration::from_secs(1), commands.recv()).await.unwrap().unwrap();
        assert_eq!(got, cmd);
    }

    #[tokio::test]
    async fn test_frames_demultiplexed_by_channel() {
        let (bus, _commands, _router_rx, mut router_tx) = bus_with_router();
        let mut one = bus.channel("ch1").await.unwrap();
        let mut two = bus.channel("ch2").await.unwrap();

        router_tx.send(&Envelope::new("ch2", "b", "a", Payload::Stdout(Bytes::from("two")))).await.unwrap();
        router_tx.send(&Envelope::new("ch1", "b", "a", Payload::Stdout(Bytes::from("one")))).await.unwrap();

        let got_one = timeout(Duration::from_secs(1), one.inbound.recv()).await.unwrap().unwrap();
        let got_two = timeout(Duration::from_secs(1), two.inbound.recv()).await.unwrap().unwrap();
        assert_eq!(got_one.data, Bytes::from("one"));
        assert_eq!(got_two.data, Bytes::from("two"));
    }

    #[tokio::test]
    async fn test_inbound_created_lazily_before_claim() {
        let (bus, _commands, _router_rx, mut router_tx) = bus_with_router();
        router_tx.send(&Envelope::new("ch5", "b", "a", Payload::EofStdin)).await.unwrap();

        for _ in 0..100 {
            if bus.channel_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let mut handle = bus.channel("ch5").await.unwrap();
        let got = timeout(Duration::from_secs(1), handle.inbound.recv()).await.unwrap().unwrap();
        assert_eq!(got.flag, shmux_proto::Flag::EofStdin);
    }

    #[tokio::test]
    async fn test_outbound_order_preserved() {
        let (bus, _commands, mut router_rx, _router_tx) = bus_with_router();
        let handle = bus.channel("ch1").await.unwrap();

        let sent: Vec<Envelope> = (0..50)
            .map(|i| Envelope::new("ch1", "a", "b", Payload::Stdout(Bytes::from(format!("{i}")))))
            .collect();
        for env in &sent {
            handle.outbound.send(env.clone()).await.unwrap();
        }

        for expected in sent {
            let got: Envelope = timeout(Duration::from_secs(1), router_rx.recv()).await.unwrap().unwrap().unwrap();
            assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn test_second_claim_rejected() {
        let (bus, _commands, _router_rx, _router_tx) = bus_with_router();
        let _first = bus.channel("ch1").await.unwrap();
        let second = bus.channel("ch1").await;
        assert!(matches!(second, Err(AgentError::ChannelInUse(id)) if id == "ch1"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (bus, _commands, _router_rx, _router_tx) = bus_with_router();
        let _handle = bus.channel("ch1").await.unwrap();
        assert_eq!(bus.channel_count().await, 1);

        bus.close("ch1").await;
        assert_eq!(bus.channel_count().await, 0);
        bus.close("ch1").await;
        bus.close("never-opened").await;
        assert_eq!(bus.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_late_frames_after_close_dropped() {
        let (bus, _commands, _router_rx, mut router_tx) = bus_with_router();
        let _handle = bus.channel("ch1").await.unwrap();
        bus.close("ch1").await;

        for i in 0..1000 {
            let env = Envelope::new("ch1", "b", "a", Payload::Stdout(Bytes::from(format!("{i}"))));
            router_tx.send(&env).await.unwrap();
        }
        // frames are delivered in order, so once the marker shows up every late frame was seen
        router_tx.send(&Envelope::new("ch9", "b", "a", Payload::EofStdout)).await.unwrap();
        let mut marker = None;
        for _ in 0..200 {
            if bus.channel_count().await > 0 {
                marker = Some(bus.channel("ch9").await.unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let mut marker = marker.expect("marker frame never delivered");
        let got = timeout(Duration::from_secs(1), marker.inbound.recv()).await.unwrap().unwrap();
        assert_eq!(got.flag, shmux_proto::Flag::EofStdout);
        assert!(marker.inbound.try_recv().is_err());

        bus.close("ch9").await;
        assert_eq!(bus.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_channel_can_be_reopened() {
        let (bus, _commands, _router_rx, mut router_tx) = bus_with_router();
        let handle = bus.channel("ch1").await.unwrap();
        drop(handle);
        bus.close("ch1").await;

        let mut handle = bus.channel("ch1").await.unwrap();
        router_tx.send(&Envelope::new("ch1", "b", "a", Payload::EofStderr)).await.unwrap();
        let got = timeout(Duration::from_secs(1), handle.inbound.recv()).await.unwrap().unwrap();
        assert_eq!(got.flag, shmux_proto::Flag::EofStderr);
    }

    #[tokio::test]
    async fn test_close_drains_in_flight_frames() {
        let (bus, _commands, mut router_rx, _router_tx) = bus_with_router();
        let handle = bus.channel("ch1").await.unwrap();
        handle.outbound.send(Envelope::new("ch1", "a", "b", Payload::Stdout(Bytes::from("x")))).await.unwrap();
        handle.outbound.send(Envelope::new("ch1", "a", "b", Payload::EofStdout)).await.unwrap();
        bus.close("ch1").await;
        drop(handle);

        let first: Envelope = timeout(Duration::from_secs(1), router_rx.recv()).await.unwrap().unwrap().unwrap();
        let second: Envelope = timeout(Duration::from_secs(1), router_rx.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(first.flag, shmux_proto::Flag::MsgStdout);
        assert_eq!(second.flag, shmux_proto::Flag::EofStdout);
    }

    #[tokio::test]
    async fn test_connection_loss_releases_sessions() {
        let (bus, mut commands, router_rx, router_tx) = bus_with_router();
        let mut handle = bus.channel("ch1").await.unwrap();
        drop(router_tx);
        drop(router_rx);

        assert!(timeout(Duration::from_secs(1), handle.inbound.recv()).await.unwrap().is_none());
        assert!(timeout(Duration::from_secs(1), commands.recv()).await.unwrap().is_none());
        assert!(bus.is_closed());
        assert!(matches!(bus.channel("ch2").await, Err(AgentError::BusClosed)));
    }
}
