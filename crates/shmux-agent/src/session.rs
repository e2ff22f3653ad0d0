//! Execution session state machine
//!
//! A session starts from one `COMMAND` envelope, either read from a front-end exec connection
//! or taken off the bus command queue. Local targets spawn the command and stream its stdio;
//! remote targets open a channel to the target peer and relay frames both ways.

use crate::endpoint::{EnvelopeSink, EnvelopeSource, Route};
use crate::process::{self, ShellProcess};
use crate::{AgentContext, AgentError, ChannelHandle, Result};
use shmux_proto::{Admission, Envelope, FrameReader, FrameWriter, Payload, StdStream, StreamTracker};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Command accepted, nothing started yet
    ReceivedCommand,
    /// Spawning the command on this agent
    LocalExec,
    /// Opening a channel to the target peer
    RemoteForward,
    /// Copiers running
    Streaming,
    /// Waiting for copiers and the process to finish
    Draining,
    /// Everything released
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReceivedCommand => "RECEIVED_COMMAND",
            Self::LocalExec => "LOCAL_EXEC",
            Self::RemoteForward => "REMOTE_FORWARD",
            Self::Streaming => "STREAMING",
            Self::Draining => "DRAINING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Per-command state
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    ctx: Arc<AgentContext>,
    command: String,
    requester: String,
    target: String,
    reply_channel: String,
    state: SessionState,
    cancel: CancellationToken,
}

impl Session {
    /// Accept a `COMMAND` envelope
    pub fn new(ctx: Arc<AgentContext>, envelope: Envelope, cancel: CancellationToken) -> Result<Self> {
        let Envelope {
            channel,
            from,
            to,
            flag,
            data,
        } = envelope;
        let Payload::Command(command) = Payload::from_parts(flag, data)? else {
            return Err(AgentError::NotACommand(flag));
        };

        Ok(Self {
            id: Uuid::new_v4(),
            ctx,
            command,
            requester: from,
            target: to,
            reply_channel: channel,
            state: SessionState::ReceivedCommand,
            cancel,
        })
    }

    /// Session id used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Shell command line
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Peer the command runs on
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Peer that asked for the command
    pub fn requester(&self) -> &str {
        &self.requester
    }

    /// Token that aborts every copier of this session
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Session {}: {} -> {}", self.id, self.state, state);
        self.state = state;
    }

    /// Run a spawned process, copying `source` to its stdin and its output to `sink`
    async fn run_local<S, K>(&mut self, process: ShellProcess, source: &mut S, sink: &mut K, route: Route) -> Result<()>
    where
        S: EnvelopeSource + ?Sized,
        K: EnvelopeSink + ?Sized,
    {
        self.set_state(SessionState::Streaming);
        let ShellProcess {
            mut child,
            stdin,
            stdout,
            stderr,
        } = process;
        let chunk_size = self.ctx.config.chunk_size;
        let (tx, rx) = mpsc::channel(self.ctx.config.outbound_capacity.max(1));
        let cancel = self.cancel.clone();

        let (_, _, _, pumped) = tokio::join!(
            process::copy_stdin(source, stdin, cancel.clone()),
            process::copy_output(stdout, StdStream::Stdout, chunk_size, tx.clone(), cancel.clone()),
            process::copy_output(stderr, StdStream::Stderr, chunk_size, tx, cancel.clone()),
            pump(rx, sink, &route, &cancel),
        );

        self.set_state(SessionState::Draining);
        match process::reap(&mut child, &cancel).await {
            Some(status) => info!("Session {} finished: {}", self.id, status),
            None => warn!("Session {} finished without exit status", self.id),
        }
        self.set_state(SessionState::Closed);
        pumped
    }

    /// Release a remote requester after the command failed to start
    async fn refuse<S, K>(&mut self, source: &mut S, sink: &mut K, route: &Route)
    where
        S: EnvelopeSource + ?Sized,
        K: EnvelopeSink + ?Sized,
    {
        for payload in [Payload::EofStdout, Payload::EofStderr] {
            if let Err(e) = sink.send_envelope(route.wrap(payload)).await {
                warn!("Session {} failed to release requester: {}", self.id, e);
                break;
            }
        }
        self.set_state(SessionState::Draining);
        process::copy_stdin(source, tokio::io::sink(), self.cancel.clone()).await;
        self.set_state(SessionState::Closed);
    }

    /// Relay the command to a remote peer over a fresh channel
    async fn run_remote<S, K>(&mut self, source: &mut S, sink: &mut K) -> Result<()>
    where
        S: EnvelopeSource + ?Sized,
        K: EnvelopeSink + ?Sized,
    {
        self.set_state(SessionState::RemoteForward);
        let ctx = Arc::clone(&self.ctx);
        let id = ctx.channels.create().await?;
        let ChannelHandle {
            mut inbound,
            mut outbound,
            ..
        } = ctx.bus.channel(&id).await?;

        let to_target = Route::new(id.clone(), ctx.peer_id.clone(), self.target.clone());
        let to_requester = Route::new(self.reply_channel.clone(), self.target.clone(), self.requester.clone());
        info!("Session {} forwarding to {} on {}", self.id, self.target, id);

        let command = Payload::Command(self.command.clone());
        let result = match outbound.send_envelope(to_target.wrap(command)).await {
            Ok(()) => {
                self.set_state(SessionState::Streaming);
                let done = CancellationToken::new();
                let (sent, relayed) = tokio::join!(
                    forward_stdin(source, &mut outbound, &to_target, &self.cancel, &done),
                    forward_results(&mut inbound, sink, &to_requester, &self.cancel, &done),
                );
                sent.and(relayed)
            }
            Err(e) => Err(e),
        };

        self.set_state(SessionState::Draining);
        drop(outbound);
        drop(inbound);
        ctx.bus.close(&id).await;
        if let Err(e) = ctx.channels.delete(&id).await {
            debug!("Failed to release channel {}: {}", id, e);
        }
        self.set_state(SessionState::Closed);
        result
    }
}

/// Serve one front-end exec connection
///
/// A command that cannot be started closes the connection without sending any frame.
pub async fn handle_frontend<S>(ctx: Arc<AgentContext>, stream: S, cancel: CancellationToken) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    let first = reader.recv_envelope().await?.ok_or(AgentError::NoCommand)?;
    let mut session = Session::new(Arc::clone(&ctx), first, cancel)?;
    info!("Session {}: {:?} on {:?}", session.id, session.command, session.target);

    if ctx.is_local(&session.target) {
        session.set_state(SessionState::LocalExec);
        let process = ShellProcess::spawn(&ctx.config.shell, &session.command)?;
        let route = Route::new(session.reply_channel.clone(), ctx.peer_id.clone(), session.requester.clone());
        session.run_local(process, &mut reader, &mut writer, route).await?;
    } else {
        session.run_remote(&mut reader, &mut writer).await?;
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Front-end already gone: {}", e);
    }
    Ok(())
}

/// Run a command another peer sent over the bus
///
/// The channel named in the envelope is opened, used for the whole session and closed at the
/// end on every path.
pub async fn handle_peer_command(ctx: Arc<AgentContext>, envelope: Envelope) -> Result<()> {
    let cancel = ctx.bus.cancellation().child_token();
    let mut session = Session::new(Arc::clone(&ctx), envelope, cancel)?;
    let ChannelHandle {
        id,
        mut inbound,
        mut outbound,
    } = ctx.bus.channel(&session.reply_channel).await?;
    info!(
        "Session {}: {:?} from {} on {}",
        session.id, session.command, session.requester, id
    );

    session.set_state(SessionState::LocalExec);
    let route = Route::new(id.clone(), ctx.peer_id.clone(), session.requester.clone());
    let result = match ShellProcess::spawn(&ctx.config.shell, &session.command) {
        Ok(process) => session.run_local(process, &mut inbound, &mut outbound, route).await,
        Err(e) => {
            warn!("Session {}: {}", session.id, e);
            session.refuse(&mut inbound, &mut outbound, &route).await;
            Err(e)
        }
    };

    drop(outbound);
    drop(inbound);
    ctx.bus.close(&id).await;
    result
}

/// Apply the stream grammar to an outgoing payload
fn admitted(tracker: &mut StreamTracker, payload: &Payload) -> bool {
    match tracker.admit(payload) {
        Admission::Forward => true,
        Admission::SkipEmpty | Admission::DuplicateEof => false,
        Admission::AfterEof => {
            warn!("Dropping {} after its EOF", payload.flag());
            false
        }
    }
}

/// Write process output to the session sink in the order the copiers produced it
async fn pump<K>(
    mut rx: mpsc::Receiver<Payload>,
    sink: &mut K,
    route: &Route,
    cancel: &CancellationToken,
) -> Result<()>
where
    K: EnvelopeSink + ?Sized,
{
    let mut tracker = StreamTracker::new();
    while let Some(payload) = rx.recv().await {
        if !admitted(&mut tracker, &payload) {
            continue;
        }
        if let Err(e) = sink.send_envelope(route.wrap(payload)).await {
            warn!("Failed to send output: {}", e);
            cancel.cancel();
            return Err(e);
        }
    }
    Ok(())
}

/// Relay requester stdin onto the channel, always finishing with `EOF_STDIN`
///
/// A requester that goes away before sending `EOF_STDIN` cancels the whole session.
async fn forward_stdin<S, K>(
    source: &mut S,
    sink: &mut K,
    route: &Route,
    cancel: &CancellationToken,
    done: &CancellationToken,
) -> Result<()>
where
    S: EnvelopeSource + ?Sized,
    K: EnvelopeSink + ?Sized,
{
    let mut tracker = StreamTracker::new();
    let mut failure = None;
    let mut abandoned = false;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = done.cancelled() => break,
            next = source.recv_envelope() => next,
        };
        match next {
            Ok(Some(envelope)) => match envelope.into_payload() {
                Ok(Payload::EofStdin) => break,
                Ok(payload @ Payload::Stdin(_)) => {
                    if admitted(&mut tracker, &payload) {
                        sink.send_envelope(route.wrap(payload)).await?;
                    }
                }
                Ok(other) => {
                    warn!("Unexpected {} from requester", other.flag());
                    break;
                }
                Err(e) => {
                    warn!("Invalid frame from requester: {}", e);
                    break;
                }
            },
            Ok(None) => {
                debug!("Requester went away before EOF_STDIN");
                abandoned = true;
                break;
            }
            Err(e) => {
                warn!("Failed to receive from requester: {}", e);
                failure = Some(e);
                break;
            }
        }
    }

    let eof = sink.send_envelope(route.wrap(Payload::EofStdin)).await;
    if let Some(e) = failure {
        cancel.cancel();
        return Err(e);
    }
    if abandoned {
        cancel.cancel();
    }
    eof
}

/// Relay the target's output back to the requester until both output streams end
async fn forward_results<K>(
    inbound: &mut mpsc::UnboundedReceiver<Envelope>,
    sink: &mut K,
    route: &Route,
    cancel: &CancellationToken,
    done: &CancellationToken,
) -> Result<()>
where
    K: EnvelopeSink + ?Sized,
{
    let mut tracker = StreamTracker::new();
    let outcome = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            next = inbound.recv() => next,
        };
        let Some(envelope) = next else {
            debug!("Channel closed before both outputs ended");
            break Ok(());
        };
        let payload = match envelope.into_payload() {
            Ok(payload @ (Payload::Stdout(_) | Payload::Stderr(_) | Payload::EofStdout | Payload::EofStderr)) => {
                payload
            }
            Ok(other) => {
                warn!("Unexpected {} from target", other.flag());
                break Ok(());
            }
            Err(e) => {
                warn!("Invalid frame from target: {}", e);
                break Ok(());
            }
        };
        if admitted(&mut tracker, &payload) {
            if let Err(e) = sink.send_envelope(route.wrap(payload)).await {
                warn!("Failed to send results to requester: {}", e);
                break Err(e);
            }
        }
        if tracker.outputs_closed() {
            break Ok(());
        }
    };
    done.cancel();
    outcome
}
